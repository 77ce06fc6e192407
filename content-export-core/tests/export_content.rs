use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use content_export_core::contract::{MockArchiveJobs, MockAssetFetcher};
use content_export_core::error::BoxError;
use content_export_core::export::{export_content, fetch_content_library, LibraryLayout};
use content_export_core::transfer::{AssetProgress, ProgressFn};
use content_export_core::{ExportError, ExportOptions, JobError};
use serde_json::json;
use tempfile::{tempdir, NamedTempFile};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn library_markup(library_id: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<library xmlns="http://www.demandware.com/xml/impex/library/2006-10-31" library-id="{library_id}">
    <folder folder-id="root"/>
    <content content-id="homepage">
        <type>page.storePage</type>
        <data xml:lang="x-default"><![CDATA[{{"image":{{"path":"/images/home.jpg"}}}}]]></data>
        <content-links>
            <content-link content-id="hero-banner"/>
            <content-link content-id="product-grid"/>
        </content-links>
    </content>
    <content content-id="hero-banner">
        <type>component.heroBanner</type>
        <data xml:lang="x-default"><![CDATA[{{"image":{{"path":"images/hero.jpg"}}}}]]></data>
        <content-links>
            <content-link content-id="cta-button"/>
        </content-links>
    </content>
    <content content-id="cta-button">
        <type>component.button</type>
    </content>
    <content content-id="product-grid">
        <type>component.productGrid</type>
        <online-flag>false</online-flag>
        <data xml:lang="x-default"><![CDATA[{{"image":{{"path":"images/grid.jpg"}}}}]]></data>
    </content>
    <content content-id="about-us">
        <type>page.storePage</type>
    </content>
    <content content-id="footer-copy"/>
</library>
"#
    )
}

fn archive_with(entry: &str, content: &str) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("instance/content-export/meta/system-objecttype-extensions.xml", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"<metadata/>").unwrap();
    zip.start_file(entry, SimpleFileOptions::default()).unwrap();
    zip.write_all(content.as_bytes()).unwrap();
    zip.finish().unwrap().into_inner()
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn asset_bytes(remote_path: &str) -> Vec<u8> {
    format!("bytes of {remote_path}").into_bytes()
}

fn serving_fetcher() -> MockAssetFetcher {
    let mut assets = MockAssetFetcher::new();
    assets
        .expect_fetch_asset()
        .returning(|path: &str| Ok(asset_bytes(path)));
    assets
}

fn unused_jobs() -> MockArchiveJobs {
    let mut jobs = MockArchiveJobs::new();
    jobs.expect_run_export_job().times(0);
    jobs
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

#[tokio::test]
async fn shared_library_export_downloads_assets_and_writes_markup() {
    let out = tempdir().unwrap();
    let archive = archive_with(
        "instance/content-export/libraries/SharedLibrary/library.xml",
        &library_markup("SharedLibrary"),
    );

    let mut jobs = MockArchiveJobs::new();
    jobs.expect_run_export_job()
        .withf(|units, _| *units == json!({ "libraries": { "SharedLibrary": true } }))
        .times(1)
        .returning(move |_, _| Ok(archive.clone()));

    let requested = Arc::new(Mutex::new(Vec::new()));
    let recorder = requested.clone();
    let mut assets = MockAssetFetcher::new();
    assets
        .expect_fetch_asset()
        .times(2)
        .returning(move |path: &str| {
            recorder.lock().unwrap().push(path.to_string());
            Ok(asset_bytes(path))
        });

    let result = export_content(
        &jobs,
        &assets,
        &ids(&["homepage"]),
        "SharedLibrary",
        out.path(),
        &ExportOptions::default(),
    )
    .await
    .expect("export succeeds");

    assert_eq!(result.page_count, 1);
    assert_eq!(result.content_count, 0);
    assert_eq!(result.component_count, 2);
    assert!(result.failed_assets.is_empty());

    let mut downloaded = result.downloaded_assets.clone();
    downloaded.sort();
    assert_eq!(downloaded, vec!["images/hero.jpg", "images/home.jpg"]);

    let mut requested = requested.lock().unwrap().clone();
    requested.sort();
    assert_eq!(
        requested,
        vec![
            "Libraries/SharedLibrary/default/images/hero.jpg",
            "Libraries/SharedLibrary/default/images/home.jpg"
        ]
    );

    let library_dir = out.path().join("libraries/SharedLibrary");
    assert_eq!(
        std::fs::read(library_dir.join("static/default/images/home.jpg")).unwrap(),
        asset_bytes("Libraries/SharedLibrary/default/images/home.jpg")
    );
    assert!(!library_dir.join("static/default/images/grid.jpg").exists());

    assert_eq!(result.markup_path, library_dir.join("library.xml"));
    let markup = read(&result.markup_path);
    assert!(markup.contains(r#"content-id="homepage""#));
    assert!(markup.contains(r#"content-id="cta-button""#));
    assert!(!markup.contains(r#"content-id="about-us""#));
    assert!(!markup.contains(r#"content-id="product-grid""#));
    assert!(markup.contains(r#"folder-id="root""#));
}

#[tokio::test]
async fn site_library_uses_site_layout() {
    let out = tempdir().unwrap();
    let archive = archive_with(
        "instance/content-export/sites/RefArch/library/library.xml",
        &library_markup("RefArch"),
    );

    let mut jobs = MockArchiveJobs::new();
    jobs.expect_run_export_job()
        .withf(|units, _| *units == json!({ "sites": { "RefArch": { "content": true } } }))
        .times(1)
        .returning(move |_, _| Ok(archive.clone()));

    let options = ExportOptions {
        is_site_library: true,
        ..ExportOptions::default()
    };
    let result = export_content(
        &jobs,
        &serving_fetcher(),
        &ids(&["homepage"]),
        "RefArch",
        out.path(),
        &options,
    )
    .await
    .unwrap();

    let library_dir = out.path().join("sites/RefArch/library");
    assert_eq!(result.markup_path, library_dir.join("library.xml"));
    assert!(result.markup_path.exists());
    assert_eq!(
        std::fs::read(library_dir.join("static/default/images/hero.jpg")).unwrap(),
        asset_bytes("Libraries/RefArch/default/images/hero.jpg")
    );
}

#[tokio::test]
async fn offline_export_from_local_file_touches_no_collaborator() {
    let out = tempdir().unwrap();
    let library_file = NamedTempFile::new().unwrap();
    std::fs::write(library_file.path(), library_markup("SharedLibrary")).unwrap();

    let mut assets = MockAssetFetcher::new();
    assets.expect_fetch_asset().times(0);

    let options = ExportOptions {
        library_file: Some(library_file.path().to_path_buf()),
        offline: true,
        ..ExportOptions::default()
    };
    let result = export_content(
        &unused_jobs(),
        &assets,
        &ids(&["homepage", "footer-copy"]),
        "SharedLibrary",
        out.path(),
        &options,
    )
    .await
    .unwrap();

    assert_eq!(result.page_count, 1);
    assert_eq!(result.content_count, 1);
    assert!(result.downloaded_assets.is_empty());
    assert!(result.failed_assets.is_empty());
    assert!(result.markup_path.exists());
    assert!(!out.path().join("libraries/SharedLibrary/static").exists());
}

#[tokio::test]
async fn asset_failures_are_reported_and_markup_still_written() {
    let out = tempdir().unwrap();
    let library_file = NamedTempFile::new().unwrap();
    std::fs::write(library_file.path(), library_markup("SharedLibrary")).unwrap();

    let mut assets = MockAssetFetcher::new();
    assets.expect_fetch_asset().returning(|path: &str| {
        if path.ends_with("hero.jpg") {
            Err::<Vec<u8>, BoxError>("404 Not Found".into())
        } else {
            Ok(asset_bytes(path))
        }
    });

    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();
    let callback: Arc<ProgressFn> = Arc::new(move |p: &AssetProgress| sink.lock().unwrap().push(p.clone()));
    let options = ExportOptions {
        library_file: Some(library_file.path().to_path_buf()),
        on_asset_progress: Some(callback),
        ..ExportOptions::default()
    };

    let result = export_content(
        &unused_jobs(),
        &assets,
        &ids(&["homepage"]),
        "SharedLibrary",
        out.path(),
        &options,
    )
    .await
    .unwrap();

    assert_eq!(result.downloaded_assets, vec!["images/home.jpg"]);
    assert_eq!(result.failed_assets.len(), 1);
    assert_eq!(result.failed_assets[0].id, "images/hero.jpg");
    assert!(result.failed_assets[0].error.contains("404 Not Found"));
    assert!(result.markup_path.exists());

    let progress = progress.lock().unwrap();
    assert_eq!(progress.len(), 2);
    assert_eq!(progress.iter().filter(|p| !p.success).count(), 1);
}

#[tokio::test]
async fn missing_archive_entry_is_fatal() {
    let out = tempdir().unwrap();
    let archive = archive_with(
        "instance/content-export/libraries/OtherLibrary/library.xml",
        &library_markup("OtherLibrary"),
    );
    let mut jobs = MockArchiveJobs::new();
    jobs.expect_run_export_job()
        .returning(move |_, _| Ok(archive.clone()));

    let err = export_content(
        &jobs,
        &serving_fetcher(),
        &ids(&["homepage"]),
        "SharedLibrary",
        out.path(),
        &ExportOptions::default(),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(err, ExportError::MissingArchiveEntry { ref expected } if expected == "libraries/SharedLibrary/library.xml")
    );
    assert!(!out.path().join("libraries").exists());
}

#[tokio::test]
async fn job_timeout_propagates() {
    let out = tempdir().unwrap();
    let mut jobs = MockArchiveJobs::new();
    jobs.expect_run_export_job()
        .withf(|_, wait| wait.timeout == Duration::from_secs(30))
        .returning(|_, wait| Err(JobError::Timeout { waited: wait.timeout }));

    let mut options = ExportOptions::default();
    options.wait.timeout = Duration::from_secs(30);

    let err = export_content(
        &jobs,
        &serving_fetcher(),
        &ids(&["homepage"]),
        "SharedLibrary",
        out.path(),
        &options,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ExportError::Job(JobError::Timeout { waited }) if waited == Duration::from_secs(30)));
}

#[tokio::test]
async fn invalid_archive_bytes_are_fatal() {
    let out = tempdir().unwrap();
    let mut jobs = MockArchiveJobs::new();
    jobs.expect_run_export_job()
        .returning(|_, _| Ok(b"definitely not a zip".to_vec()));

    let err = export_content(
        &jobs,
        &serving_fetcher(),
        &ids(&["homepage"]),
        "SharedLibrary",
        out.path(),
        &ExportOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ExportError::Archive(_)));
}

#[tokio::test]
async fn invalid_pattern_is_fatal() {
    let out = tempdir().unwrap();
    let library_file = NamedTempFile::new().unwrap();
    std::fs::write(library_file.path(), library_markup("SharedLibrary")).unwrap();
    let options = ExportOptions {
        library_file: Some(library_file.path().to_path_buf()),
        use_pattern: true,
        ..ExportOptions::default()
    };

    let err = export_content(
        &unused_jobs(),
        &serving_fetcher(),
        &ids(&["home(page"]),
        "SharedLibrary",
        out.path(),
        &options,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ExportError::Selection(_)));
}

#[tokio::test]
async fn unreadable_library_file_is_fatal() {
    let out = tempdir().unwrap();
    let options = ExportOptions {
        library_file: Some(out.path().join("does-not-exist.xml")),
        ..ExportOptions::default()
    };
    let err = export_content(
        &unused_jobs(),
        &serving_fetcher(),
        &ids(&["homepage"]),
        "SharedLibrary",
        out.path(),
        &options,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ExportError::Io { .. }));
}

#[tokio::test]
async fn markup_write_failure_is_fatal() {
    let blocker = NamedTempFile::new().unwrap();
    let library_file = NamedTempFile::new().unwrap();
    std::fs::write(library_file.path(), library_markup("SharedLibrary")).unwrap();
    let options = ExportOptions {
        library_file: Some(library_file.path().to_path_buf()),
        offline: true,
        ..ExportOptions::default()
    };

    // output directory is a regular file, so creating the library directory fails
    let err = export_content(
        &unused_jobs(),
        &serving_fetcher(),
        &ids(&["homepage"]),
        "SharedLibrary",
        blocker.path(),
        &options,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ExportError::Io { ref path, .. } if path.ends_with("library.xml")));
}

#[tokio::test]
async fn fetch_content_library_keeps_archive_for_job_runs() {
    let archive = archive_with("libraries/SharedLibrary/library.xml", &library_markup("SharedLibrary"));
    let expected_len = archive.len();
    let mut jobs = MockArchiveJobs::new();
    jobs.expect_run_export_job()
        .times(1)
        .returning(move |_, _| Ok(archive.clone()));

    let fetched = fetch_content_library(&jobs, "SharedLibrary", &ExportOptions::default())
        .await
        .unwrap();
    assert_eq!(fetched.archive.map(|a| a.len()), Some(expected_len));
    assert_eq!(fetched.tree.root().id, "SharedLibrary");
    // unfiltered: every page and content node is still present
    assert_eq!(fetched.tree.children(fetched.tree.root_id()).count(), 3);
}

#[test]
fn layout_paths() {
    let shared = LibraryLayout::new("SharedLibrary", false);
    assert_eq!(shared.markup_path(), Path::new("libraries/SharedLibrary/library.xml"));
    assert_eq!(
        shared.asset_path("images/a b.jpg"),
        Path::new("libraries/SharedLibrary/static/default/images/a b.jpg")
    );
    assert_eq!(
        shared.remote_asset_path("/images/a.jpg"),
        "Libraries/SharedLibrary/default/images/a.jpg"
    );

    let site = LibraryLayout::new("RefArch", true);
    assert_eq!(site.markup_path(), Path::new("sites/RefArch/library/library.xml"));
    assert_eq!(site.archive_entry_suffix(), "sites/RefArch/library/library.xml");
}

#[test]
fn asset_paths_cannot_escape_the_static_directory() {
    let layout = LibraryLayout::new("SharedLibrary", false);
    assert_eq!(
        layout.asset_path("../../etc/passwd"),
        Path::new("libraries/SharedLibrary/static/default/etc/passwd")
    );
}

#[test]
fn remote_asset_paths_are_normalised_like_local_ones() {
    let layout = LibraryLayout::new("SharedLibrary", false);
    assert_eq!(
        layout.remote_asset_path("../../x/./y.jpg"),
        "Libraries/SharedLibrary/default/x/y.jpg"
    );
    assert_eq!(
        layout.remote_asset_path("images\\banners//hero.jpg"),
        "Libraries/SharedLibrary/default/images/banners/hero.jpg"
    );
    assert_eq!(
        layout.asset_path("images\\banners//hero.jpg"),
        Path::new("libraries/SharedLibrary/static/default/images/banners/hero.jpg")
    );
}
