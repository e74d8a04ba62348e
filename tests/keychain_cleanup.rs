//! Keychain lifecycle tests against stubbed `security`/`xcrun` binaries.
//!
//! The stubs record every invocation to a log file, so the tests can assert
//! the exact setup and teardown sequence without touching a real keychain.

#![cfg(unix)]

use sparklecast::config::SigningConfig;
use sparklecast::error::Error;
use sparklecast::keychain;
use sparklecast::workdir::WorkDir;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const HOME_KEYCHAIN: &str = "/fake/Library/Keychains/login.keychain-db";

const SECURITY_STUB: &str = r#"#!/bin/sh
echo "security $*" >> "$SPARKLECAST_TEST_CMDLOG"
case "$1" in
  list-keychains)
    # Bare list-keychains prints the search list; -s/-d forms mutate it.
    if [ "$2" = "-s" ] || [ "$2" = "-d" ]; then exit 0; fi
    printf '    "%s"\n' "$SPARKLECAST_TEST_HOME_KEYCHAIN"
    ;;
  default-keychain)
    if [ "$2" = "-s" ]; then exit 0; fi
    printf '    "%s"\n' "$SPARKLECAST_TEST_HOME_KEYCHAIN"
    ;;
  create-keychain)
    touch "$4"
    ;;
  import)
    if [ -f "$SPARKLECAST_TEST_FAIL_IMPORT" ]; then
      echo "SecKeychainItemImport: MAC verification failed" >&2
      exit 1
    fi
    ;;
  find-certificate)
    printf '    "labl"<blob>="Developer ID Application: Jane Doe (ABCDE12345)"\n'
    ;;
esac
exit 0
"#;

const XCRUN_STUB: &str = r#"#!/bin/sh
echo "xcrun $*" >> "$SPARKLECAST_TEST_CMDLOG"
exit 0
"#;

fn write_stub(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn signing_config() -> SigningConfig {
    SigningConfig {
        // "not a real p12" in base64; the stub never inspects it
        certificate_base64: "bm90IGEgcmVhbCBwMTI=".to_string(),
        certificate_password: "p12-password".to_string(),
        apple_id: "jane@example.com".to_string(),
        app_specific_password: "abcd-efgh-ijkl-mnop".to_string(),
    }
}

struct Harness {
    _root: tempfile::TempDir,
    keychains_dir: PathBuf,
    workdir: WorkDir,
    command_log: PathBuf,
    fail_import_marker: PathBuf,
}

impl Harness {
    async fn set_up() -> Self {
        let root = tempfile::tempdir().unwrap();
        let stub_dir = root.path().join("bin");
        fs::create_dir(&stub_dir).unwrap();
        write_stub(&stub_dir, "security", SECURITY_STUB);
        write_stub(&stub_dir, "xcrun", XCRUN_STUB);

        let keychains_dir = root.path().join("keychains");
        fs::create_dir(&keychains_dir).unwrap();

        let command_log = root.path().join("commands.log");
        let fail_import_marker = root.path().join("fail-import");

        let path = format!(
            "{}:{}",
            stub_dir.display(),
            std::env::var("PATH").unwrap_or_default()
        );
        // SAFETY: this is the only test in this binary, so no other thread
        // reads or writes the process environment concurrently.
        unsafe {
            std::env::set_var("PATH", path);
            std::env::set_var("SPARKLECAST_TEST_CMDLOG", &command_log);
            std::env::set_var("SPARKLECAST_TEST_HOME_KEYCHAIN", HOME_KEYCHAIN);
            std::env::set_var("SPARKLECAST_TEST_FAIL_IMPORT", &fail_import_marker);
        }

        let workdir = WorkDir::create(root.path().join("build")).await.unwrap();

        Self {
            _root: root,
            keychains_dir,
            workdir,
            command_log,
            fail_import_marker,
        }
    }

    fn logged_commands(&self) -> Vec<String> {
        match fs::read_to_string(&self.command_log) {
            Ok(contents) => contents.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn reset_log(&self) {
        let _ = fs::remove_file(&self.command_log);
    }

    fn run_keychain_files(&self) -> Vec<String> {
        fs::read_dir(&self.keychains_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("sparklecast-"))
            .collect()
    }

    fn assert_configuration_restored(&self) {
        let commands = self.logged_commands();
        let restore_list = format!("security list-keychains -s {HOME_KEYCHAIN}");
        let restore_default = format!("security default-keychain -s {HOME_KEYCHAIN}");
        assert_eq!(
            &commands[commands.len() - 2..],
            &[restore_list, restore_default],
            "keychain configuration must be restored last"
        );
    }
}

#[tokio::test]
async fn keychain_lifecycle() {
    let harness = Harness::set_up().await;

    successful_run_sweeps_stale_and_cleans_up(&harness).await;
    block_failure_still_tears_down(&harness).await;
    setup_failure_skips_block_but_still_restores(&harness).await;
}

async fn successful_run_sweeps_stale_and_cleans_up(harness: &Harness) {
    harness.reset_log();

    // A keychain left behind by a crashed prior run.
    let stale = harness
        .keychains_dir
        .join("sparklecast-stalestale1234.keychain-db");
    fs::write(&stale, b"stale").unwrap();

    let config = signing_config();
    let result = keychain::with_identity_in(
        harness.keychains_dir.clone(),
        &config,
        &harness.workdir,
        |identity| async move {
            assert_eq!(
                identity.certificate_name,
                "Developer ID Application: Jane Doe (ABCDE12345)"
            );
            assert_eq!(identity.team_id, "ABCDE12345");
            assert!(identity.keychain_path.exists());
            Ok(identity.keychain_path.clone())
        },
    )
    .await
    .unwrap();

    assert!(!stale.exists(), "stale keychain must be swept");
    assert!(!result.exists(), "run keychain must be deleted");
    assert!(harness.run_keychain_files().is_empty());

    let commands = harness.logged_commands();
    let count = |prefix: &str| commands.iter().filter(|c| c.starts_with(prefix)).count();
    assert_eq!(count("security create-keychain"), 1);
    assert_eq!(count("security unlock-keychain"), 1);
    assert_eq!(count("security import"), 1);
    assert_eq!(count("security set-key-partition-list"), 1);
    assert_eq!(count("xcrun notarytool store-credentials"), 1);
    // Once for the stale store, once for the run keychain.
    assert_eq!(count("security delete-keychain"), 2);

    // The notarization profile is registered against the run keychain.
    let store = commands
        .iter()
        .find(|c| c.starts_with("xcrun notarytool store-credentials"))
        .unwrap();
    assert!(store.contains("sparklecast.keychain.notarize.profile"));
    assert!(store.contains("--team-id ABCDE12345"));

    harness.assert_configuration_restored();
}

async fn block_failure_still_tears_down(harness: &Harness) {
    harness.reset_log();

    let config = signing_config();
    let err = keychain::with_identity_in(
        harness.keychains_dir.clone(),
        &config,
        &harness.workdir,
        |_identity| async move { Err::<(), _>(Error::validation("xcodebuild blew up")) },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Validation(message) if message == "xcodebuild blew up"));
    assert!(harness.run_keychain_files().is_empty());
    harness.assert_configuration_restored();
}

async fn setup_failure_skips_block_but_still_restores(harness: &Harness) {
    harness.reset_log();
    fs::write(&harness.fail_import_marker, b"").unwrap();

    let config = signing_config();
    let mut block_ran = false;
    let err = keychain::with_identity_in(
        harness.keychains_dir.clone(),
        &config,
        &harness.workdir,
        |_identity| {
            block_ran = true;
            async move { Ok(()) }
        },
    )
    .await
    .unwrap_err();

    fs::remove_file(&harness.fail_import_marker).unwrap();

    assert!(!block_ran, "block must not run when setup fails");
    match err {
        Error::CommandFailed { command, stderr } => {
            assert!(command.starts_with("security import"));
            assert!(stderr.contains("MAC verification failed"));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(harness.run_keychain_files().is_empty());
    harness.assert_configuration_restored();
}
