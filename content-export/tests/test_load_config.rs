use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

use content_export::load_config::load_config;

fn config_file(yaml: &str) -> NamedTempFile {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), yaml).unwrap();
    config_file
}

/// A full config maps every key onto the export settings.
#[tokio::test]
#[serial]
async fn test_load_config_full() {
    let config = config_file(
        r#"
instance:
  hostname: abcd-001.dx.commercecloud.salesforce.com
  api_version: v24_1
export:
  library: RefArch
  site_library: true
  output_dir: ./tmp/export
  ids: [homepage, "^campaign-"]
  regex: true
  folders: [campaigns]
  asset_query: [image.path, slides.image.path]
  keep_orphans: true
  offline: true
  concurrency: 8
  timeout_secs: 30
"#,
    );
    env::remove_var("SFCC_SERVER");

    let config = load_config(config.path()).expect("Config should load");

    assert_eq!(
        config.instance.hostname.as_deref(),
        Some("abcd-001.dx.commercecloud.salesforce.com")
    );
    assert_eq!(config.instance.api_version.as_deref(), Some("v24_1"));

    let export = &config.export;
    assert_eq!(export.library, "RefArch");
    assert!(export.site_library);
    assert_eq!(export.output_dir, PathBuf::from("./tmp/export"));
    assert_eq!(export.ids, vec!["homepage", "^campaign-"]);
    assert_eq!(export.folders, vec!["campaigns"]);
    assert_eq!(export.asset_query, vec!["image.path", "slides.image.path"]);
    assert!(export.keep_orphans && export.offline && export.regex);

    let options = export.to_options();
    assert!(options.is_site_library);
    assert!(options.use_pattern);
    assert_eq!(options.concurrency, 8);
    assert_eq!(options.wait.timeout, Duration::from_secs(30));
    assert_eq!(options.select_options().folders, vec!["campaigns"]);
    assert!(options.parse_options().keep_orphans);
}

/// Only the library and output directory are required.
#[tokio::test]
#[serial]
async fn test_load_config_defaults() {
    let config = config_file(
        r#"
export:
  library: SharedLibrary
  output_dir: ./export
"#,
    );
    env::remove_var("SFCC_SERVER");

    let config = load_config(config.path()).expect("Config should load");
    let export = &config.export;

    assert_eq!(config.instance.hostname, None);
    assert!(!export.site_library);
    assert!(export.ids.is_empty());
    assert!(!export.regex);
    assert!(export.folders.is_empty());
    assert_eq!(export.asset_query, vec!["image.path"]);
    assert!(!export.keep_orphans);
    assert!(!export.offline);
    assert_eq!(export.concurrency, 5);
    assert_eq!(export.timeout_secs, 600);
    assert_eq!(export.library_file, None);
}

#[tokio::test]
#[serial]
async fn test_hostname_falls_back_to_environment() {
    let config = config_file(
        r#"
export:
  library: SharedLibrary
  output_dir: ./export
"#,
    );
    env::set_var("SFCC_SERVER", "zzzz-002.dx.commercecloud.salesforce.com");

    let config = load_config(config.path()).expect("Config should load");
    env::remove_var("SFCC_SERVER");

    assert_eq!(
        config.instance.hostname.as_deref(),
        Some("zzzz-002.dx.commercecloud.salesforce.com")
    );
}

#[tokio::test]
#[serial]
async fn test_config_hostname_wins_over_environment() {
    let config = config_file(
        r#"
instance:
  hostname: from-config.example.com
export:
  library: SharedLibrary
  output_dir: ./export
"#,
    );
    env::set_var("SFCC_SERVER", "from-env.example.com");

    let config = load_config(config.path()).expect("Config should load");
    env::remove_var("SFCC_SERVER");

    assert_eq!(config.instance.hostname.as_deref(), Some("from-config.example.com"));
}

#[tokio::test]
#[serial]
async fn test_missing_config_file_fails() {
    let result = load_config("/definitely/not/here/export.yaml");
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("Failed to read config file"));
}

#[tokio::test]
#[serial]
async fn test_config_without_export_section_fails() {
    let config = config_file("instance:\n  hostname: example.com\n");
    let result = load_config(config.path());
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("Failed to parse config YAML"));
}
