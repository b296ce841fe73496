mod common;

use std::fs;
use std::path::Path;

use cdlcore::catalog::Build;
use cdlcore::config::version_index::VersionIndex;
use cdlcore::config::settings::KEY_REMOVE_PREVIOUS_VERSION;
use cdlcore::config::{ConfigStore, MemoryConfig};
use cdlcore::task::{CancelFlag, Status};
use cdlcore::tree::child_names;
use cdlcore::update::UpdateStage;
use cdlcore::{AppContext, LauncherError};
use common::{serve, write_file, zip_bytes, Recorder, Reply};

const NEW_EXE: &[u8] = b"\x7fELF....cataclysm 0.F-10600-gabc1234\x00....";

fn tileset(dir: &Path, name: &str) {
    write_file(&dir.join("tileset.txt"), format!("NAME: {name}\nVIEW: {name}\n"));
    write_file(&dir.join("tiles.png"), name);
}

/// Build 10500 as the old launcher would have left it.
fn old_install(dir: &Path) {
    write_file(&dir.join("cataclysm-tiles"), b"old binary 10500");
    tileset(&dir.join("gfx/Chesthole"), "chesthole");
    tileset(&dir.join("gfx/MyTiles"), "mytiles");
    write_file(&dir.join("save/Lakeview/#QWxp.sav"), "hero");
    write_file(&dir.join("config/options.json"), "{\"VIEWPORT\": 1}");
    write_file(&dir.join("config/debug.log"), "old noise");
    write_file(&dir.join("data/json/items.json"), "[]");
}

fn build_10600_zip(extra_files: usize) -> Vec<u8> {
    let names: Vec<String> = (0..extra_files)
        .map(|i| format!("data/json/part{i:03}.json"))
        .collect();
    let mut files: Vec<(&str, &[u8])> = vec![
        ("cataclysm-tiles", NEW_EXE),
        ("gfx/Chesthole/tileset.txt", b"NAME: chesthole\nVIEW: Chesthole\n".as_slice()),
        ("gfx/Chesthole/tiles.png", b"new chesthole".as_slice()),
        ("data/json/items.json", b"[{}]".as_slice()),
    ];
    for name in &names {
        files.push((name.as_str(), b"{}".as_slice()));
    }
    zip_bytes(&files)
}

fn build(base: &str) -> Build {
    Build {
        number: Some(10600),
        name: "cataclysmdda-0.F-10600.zip".to_string(),
        download_url: format!("{base}/builds/cataclysmdda-0.F-10600.zip"),
        published_at: None,
    }
}

fn app() -> AppContext {
    AppContext::new(Box::new(MemoryConfig::new()), VersionIndex::in_memory())
}

#[test]
fn test_update_carries_custom_tileset_and_user_data() {
    let base = serve(vec![(
        "/builds/cataclysmdda-0.F-10600.zip",
        Reply::ok(build_10600_zip(0)),
    )]);
    let tmp = tempfile::tempdir().unwrap();
    let install = tmp.path().join("cdda");
    old_install(&install);

    let app = app();
    let recorder = Recorder::default();
    let ctx = recorder.context(CancelFlag::new());
    let mut orchestrator = app.update_orchestrator();
    let outcome = orchestrator
        .start_update(&install, &build(&base), &ctx)
        .unwrap();
    assert_eq!(orchestrator.stage(), UpdateStage::Idle);

    assert_eq!(fs::read(install.join("cataclysm-tiles")).unwrap(), NEW_EXE);
    assert_eq!(
        fs::read_to_string(install.join("gfx/MyTiles/tiles.png")).unwrap(),
        "mytiles"
    );
    assert_eq!(
        fs::read_to_string(install.join("gfx/Chesthole/tiles.png")).unwrap(),
        "new chesthole"
    );
    assert_eq!(
        fs::read_to_string(install.join("save/Lakeview/#QWxp.sav")).unwrap(),
        "hero"
    );
    assert!(install.join("config/options.json").exists());
    assert!(!install.join("config/debug.log").exists());
    assert_eq!(
        fs::read_to_string(install.join("data/json/items.json")).unwrap(),
        "[{}]"
    );
    assert!(install.join("previous_version/cataclysm-tiles").exists());

    let restored: Vec<_> = outcome
        .merge
        .copied_assets()
        .map(|a| a.identity.as_str())
        .collect();
    assert_eq!(restored, vec!["mytiles"]);
    assert_eq!(outcome.state.build_number, Some(10600));
    assert_eq!(
        outcome.state.detected_version_string.as_deref(),
        Some("0.F-10600-gabc1234")
    );
    assert!(!outcome.snapshot_purged);

    let rescanned = app.scan_install(&install, &ctx).unwrap();
    assert_eq!(rescanned.build_number, Some(10600));
    assert!(rescanned.has_previous_version());

    assert_eq!(recorder.terminal().len(), 1);
    assert!(matches!(recorder.terminal()[0], Status::Finished(_)));
    assert!(!app.busy().is_busy());
}

#[test]
fn test_cancel_during_extraction_restores_install() {
    let base = serve(vec![(
        "/builds/cataclysmdda-0.F-10600.zip",
        Reply::ok(build_10600_zip(40)),
    )]);
    let tmp = tempfile::tempdir().unwrap();
    let install = tmp.path().join("cdda");
    old_install(&install);
    let before = child_names(&install).unwrap();

    let app = app();
    let recorder = Recorder::default();
    let ctx = recorder.cancelling_at("Extracting");
    let err = app
        .update_orchestrator()
        .start_update(&install, &build(&base), &ctx)
        .unwrap_err();
    assert!(err.is_cancelled());

    let after: Vec<String> = child_names(&install)
        .unwrap()
        .into_iter()
        .filter(|n| n != "previous_version")
        .collect();
    assert_eq!(after, before);
    assert_eq!(
        fs::read(install.join("cataclysm-tiles")).unwrap(),
        b"old binary 10500"
    );
    assert_eq!(
        fs::read_to_string(install.join("data/json/items.json")).unwrap(),
        "[]"
    );
    assert!(install.join("config/debug.log").exists());

    let terminal = recorder.terminal();
    assert_eq!(terminal.len(), 1);
    assert!(matches!(terminal[0], Status::Cancelled(_)));
    assert!(!app.updates().is_updating(&install));
}

#[test]
fn test_corrupt_download_restores_install() {
    let base = serve(vec![(
        "/builds/cataclysmdda-0.F-10600.zip",
        Reply::ok(b"PK\x03\x04 truncated".to_vec()),
    )]);
    let tmp = tempfile::tempdir().unwrap();
    let install = tmp.path().join("cdda");
    old_install(&install);
    let before = child_names(&install).unwrap();

    let app = app();
    let err = app
        .update_orchestrator()
        .start_update(&install, &build(&base), &Recorder::default().context(CancelFlag::new()))
        .unwrap_err();
    assert!(matches!(
        err,
        LauncherError::IncompleteDownload { .. } | LauncherError::InvalidArchive { .. }
    ));
    assert_eq!(child_names(&install).unwrap(), before);
}

#[test]
fn test_archive_without_executable_keeps_snapshot() {
    let base = serve(vec![(
        "/builds/cataclysmdda-0.F-10600.zip",
        Reply::ok(zip_bytes(&[("data/json/items.json", b"[{}]")])),
    )]);
    let tmp = tempfile::tempdir().unwrap();
    let install = tmp.path().join("cdda");
    old_install(&install);

    let app = app();
    let err = app
        .update_orchestrator()
        .start_update(&install, &build(&base), &Recorder::default().context(CancelFlag::new()))
        .unwrap_err();
    assert!(matches!(err, LauncherError::NoExecutableFound(_)));
    assert!(install.join("previous_version/cataclysm-tiles").exists());
    assert!(install.join("previous_version/save/Lakeview/#QWxp.sav").exists());
}

#[test]
fn test_fresh_install_with_purge() {
    let base = serve(vec![(
        "/builds/cataclysmdda-0.F-10600.zip",
        Reply::ok(build_10600_zip(2)),
    )]);
    let tmp = tempfile::tempdir().unwrap();
    let install = tmp.path().join("new-game");

    let mut app = app();
    app.settings_mut().set_bool(KEY_REMOVE_PREVIOUS_VERSION, true);
    let outcome = app
        .update_orchestrator()
        .start_update(&install, &build(&base), &Recorder::default().context(CancelFlag::new()))
        .unwrap();
    assert!(outcome.state.has_executable());
    assert!(!install.join("previous_version").exists());
    assert!(outcome.merge.custom.is_empty());
}
