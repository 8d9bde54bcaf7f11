use super::*;

#[test]
fn test_settings_new() {
    let settings = ClientSettings::new("../../configs/node.toml").unwrap();
    assert_eq!(settings.node.name, "node-1");
    assert_eq!(settings.node.use_case, "iris");
    assert_eq!(
        settings.node.data_path,
        PathBuf::from("rust/e2e/data/iris.csv")
    );
    assert!(ClientSettings::new("").is_err());
}

#[test]
fn test_default_use_case() {
    let settings: NodeSettings =
        serde_json::from_str(r#"{"name": "node-2", "data_path": "iris.csv"}"#).unwrap();
    assert_eq!(settings, NodeSettings::new("node-2", "iris.csv"));
}

#[test]
fn test_validate_node() {
    assert!(NodeSettings::new("node-1", "iris.csv").validate().is_ok());
    assert!(NodeSettings::new("", "iris.csv").validate().is_err());
    assert!(NodeSettings {
        use_case: String::new(),
        ..NodeSettings::new("node-1", "iris.csv")
    }
    .validate()
    .is_err());
}
