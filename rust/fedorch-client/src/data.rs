//! Loading of the local data of a node.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;

use fedorch_core::learner::{Dataset, DatasetError};

/// The use cases a node can load data for.
pub const SUPPORTED_USE_CASES: &[&str] = &["iris"];

/// Errors related to loading the local data.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("unknown use case: {0}")]
    UnsupportedUseCase(String),

    #[error("failed to read {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("the data has no header")]
    NoHeader,

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// Loads the data of `use_case` from the CSV file at `path`.
///
/// # Errors
/// Fails if the use case is not supported, if the file can't be read or if it isn't a table.
pub fn load_dataset(use_case: &str, path: &Path) -> Result<Dataset, DataError> {
    if !SUPPORTED_USE_CASES.contains(&use_case) {
        return Err(DataError::UnsupportedUseCase(use_case.to_string()));
    }
    let text = fs::read_to_string(path).map_err(|source| DataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_csv(&text)
}

/// Parses comma separated values whose first line is the header. Blank lines are skipped.
pub fn parse_csv(text: &str) -> Result<Dataset, DataError> {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());
    let columns = lines.next().map(split_fields).ok_or(DataError::NoHeader)?;
    let rows = lines.map(split_fields).collect();
    Ok(Dataset::new(columns, rows)?)
}

fn split_fields(line: &str) -> Vec<String> {
    line.split(',').map(|field| field.trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv() {
        let text = "sepal_length,species\n5.1, Iris-setosa\n\n6.3,Iris-virginica\n";
        let dataset = parse_csv(text).unwrap();
        assert_eq!(dataset.columns(), &["sepal_length", "species"]);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.rows()[0], vec!["5.1", "Iris-setosa"]);
    }

    #[test]
    fn test_parse_invalid_csv() {
        assert!(matches!(parse_csv("\n\n"), Err(DataError::NoHeader)));
        assert!(matches!(
            parse_csv("a,b\n1,2,3\n"),
            Err(DataError::Dataset(DatasetError::RaggedRow { row: 0, .. }))
        ));
    }

    #[test]
    fn test_load_dataset() {
        let dataset = load_dataset("iris", Path::new("../e2e/data/iris.csv")).unwrap();
        assert_eq!(dataset.len(), 150);
        assert_eq!(dataset.columns().len(), 5);
    }

    #[test]
    fn test_unsupported_use_case() {
        assert!(matches!(
            load_dataset("mnist", Path::new("../e2e/data/iris.csv")),
            Err(DataError::UnsupportedUseCase(use_case)) if use_case == "mnist"
        ));
        assert!(matches!(
            load_dataset("iris", Path::new("does/not/exist.csv")),
            Err(DataError::Io { .. })
        ));
    }
}
