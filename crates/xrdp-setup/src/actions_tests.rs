use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;

use tempfile::TempDir;
use xrdp_setup_core::{
    AudioSubsystem, Config, Decision, InstallationMode, Ledger, LedgerEntry, RequestFlags,
    RequestedConfiguration, RequestedMode, ResultingMode,
};

use crate::events::ProgressEvent;
use crate::fake::{FakeHost, FakeProbe};
use crate::model::{RunReport, RunStatus, StageError, StageResult};
use crate::paths::InstallPaths;

use super::actions_process::backup_path;
use super::{execute_run, ActionContext, StageKind};

struct Scenario {
    _dir: TempDir,
    request: RequestedConfiguration,
    config: Config,
    paths: InstallPaths,
    host: FakeHost,
    probe: FakeProbe,
    ledger: Ledger,
    events: Vec<ProgressEvent>,
}

impl Scenario {
    fn new(mode: RequestedMode) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let home = dir.path().join("home");
        let marker = dir.path().join("xrdp-installer-check.log");
        let mut config = Config::default();
        config.ledger.path = dir.path().join("ledger.jsonl");
        config.ledger.legacy_marker = Some(marker.clone());
        let ledger = Ledger::new(config.ledger.path.clone()).with_legacy_marker(marker);
        Self {
            request: RequestedConfiguration {
                mode,
                use_dev_branch: false,
                use_fork_variant: false,
                enable_sound: false,
                install_cuda_toolkit: false,
                verbose: false,
            },
            paths: InstallPaths::rooted_at(home.clone(), home.join("Downloads"), (1000, 1000)),
            config,
            host: FakeHost::with_installed(&["git", "pulseaudio-utils"]),
            probe: FakeProbe::ubuntu_gnome(),
            ledger,
            events: Vec::new(),
            _dir: dir,
        }
    }

    fn seed(&self, mode: RequestedMode) {
        self.ledger
            .append(&LedgerEntry::succeeded(mode, RequestFlags::default(), "seeded"))
            .expect("seed ledger");
    }

    fn run_with(&mut self, preflight: Result<(), String>) -> RunReport {
        let (tx, rx) = mpsc::channel();
        let environment = self.probe.environment.clone();
        let report = {
            let mut ctx = ActionContext {
                request: &self.request,
                environment: &environment,
                paths: &self.paths,
                config: &self.config,
                host: &mut self.host,
                probe: &self.probe,
                log_tx: tx,
            };
            execute_run(&mut ctx, &self.ledger, preflight).expect("run")
        };
        self.events.extend(rx.try_iter());
        report
    }

    fn run(&mut self) -> RunReport {
        self.run_with(Ok(()))
    }

    fn last_entry(&self) -> LedgerEntry {
        self.ledger
            .history()
            .expect("history")
            .pop()
            .expect("ledger entry")
    }

    fn source_dir(&self, name: &str) -> PathBuf {
        self.paths.source_dir(name)
    }
}

fn stage_kinds(report: &RunReport) -> Vec<(StageKind, &'static str)> {
    report
        .stages
        .iter()
        .map(|(kind, result)| (*kind, result.label()))
        .collect()
}

#[test]
fn standard_install_records_standard_mode() {
    let mut scenario = Scenario::new(RequestedMode::Standard);
    let report = scenario.run();

    assert_eq!(report.status(), RunStatus::Succeeded);
    assert_eq!(
        stage_kinds(&report),
        vec![
            (StageKind::BaseInstall, "done"),
            (StageKind::Sound, "skipped"),
            (StageKind::GpuToolkit, "skipped"),
            (StageKind::Finalize, "done"),
        ]
    );
    assert!(report.rollback.is_none());
    assert!(scenario.host.installed.contains("xrdp"));
    assert!(scenario.host.installed.contains("gnome-tweaks"));
    assert!(scenario.host.enabled_units.contains("xrdp.service"));
    assert!(scenario.host.enabled_units.contains("xrdp-sesman.service"));
    let xsession = scenario
        .host
        .files
        .get(&scenario.paths.xsession)
        .expect("xsession written");
    assert!(xsession.ends_with("exec gnome-session\n"));
    assert_eq!(
        scenario.ledger.current_mode().expect("mode"),
        InstallationMode::Standard
    );
    assert!(scenario
        .events
        .iter()
        .any(|event| matches!(event, ProgressEvent::StageStarted(StageKind::Finalize))));
}

#[test]
fn mode_conflict_changes_nothing_and_is_repeatable() {
    let mut scenario = Scenario::new(RequestedMode::Custom);
    scenario.seed(RequestedMode::Standard);
    let before = fs::read(&scenario.config.ledger.path).expect("ledger bytes");

    for _ in 0..2 {
        let report = scenario.run();
        assert_eq!(report.status(), RunStatus::Rejected);
        assert_eq!(
            report.decision,
            Decision::RequireRemovalFirst {
                current: InstallationMode::Standard,
                requested: RequestedMode::Custom,
            }
        );
        assert!(report.stages.is_empty());
    }

    assert!(scenario.host.commands.is_empty());
    let after = fs::read(&scenario.config.ledger.path).expect("ledger bytes");
    assert_eq!(before, after);
}

#[test]
fn legacy_marker_blocks_mixing_modes() {
    let mut scenario = Scenario::new(RequestedMode::Custom);
    let marker = scenario
        .config
        .ledger
        .legacy_marker
        .clone()
        .expect("marker path");
    fs::write(&marker, "standard\n").expect("write marker");

    let report = scenario.run();
    assert_eq!(report.status(), RunStatus::Rejected);
    assert!(scenario.host.commands.is_empty());
    assert!(!scenario.config.ledger.path.exists());
}

#[test]
fn failed_preflight_is_a_rejection_without_mutation() {
    let mut scenario = Scenario::new(RequestedMode::Standard);
    let report = scenario.run_with(Err("sudo is required".to_string()));

    assert_eq!(report.status(), RunStatus::Rejected);
    assert_eq!(
        report.decision,
        Decision::Reject("sudo is required".to_string())
    );
    assert!(scenario.host.commands.is_empty());
    assert!(!scenario.config.ledger.path.exists());
}

#[test]
fn cuda_without_driver_rolls_back_custom_build() {
    let mut scenario = Scenario::new(RequestedMode::Custom);
    scenario.request.install_cuda_toolkit = true;
    let report = scenario.run();

    assert_eq!(report.status(), RunStatus::StageFailed);
    assert_eq!(
        stage_kinds(&report),
        vec![
            (StageKind::BaseInstall, "done"),
            (StageKind::Sound, "skipped"),
            (StageKind::GpuToolkit, "failed"),
        ]
    );
    let (kind, err) = report.failure().expect("failure");
    assert_eq!(kind, StageKind::GpuToolkit);
    assert!(matches!(err, StageError::Precondition(_)));
    assert!(!scenario
        .host
        .labels()
        .iter()
        .any(|label| label.starts_with("wget")));

    let rollback = report.rollback.as_ref().expect("rollback ran");
    assert!(rollback.is_complete());
    for package in ["xrdp", "xorgxrdp", "checkinstall", "xserver-xorg-dev"] {
        assert!(
            !scenario.host.installed.contains(package),
            "{package} left installed"
        );
    }
    // Packages present before the run survive rollback.
    assert!(scenario.host.installed.contains("git"));
    assert!(!scenario.host.dirs.contains(&scenario.source_dir("xrdp")));
    assert!(!scenario.host.dirs.contains(&scenario.source_dir("xorgxrdp")));

    assert_eq!(
        scenario.ledger.current_mode().expect("mode"),
        InstallationMode::None
    );
    let entry = scenario.last_entry();
    assert_eq!(entry.resulting, ResultingMode::Failed);
    assert_eq!(entry.failed_stage.as_deref(), Some("CUDA toolkit"));
    assert_eq!(entry.rollback_complete, Some(true));
    assert!(entry.flags.cuda);
}

#[test]
fn sound_without_audio_fails_after_base_success() {
    let mut scenario = Scenario::new(RequestedMode::Standard);
    scenario.request.enable_sound = true;
    scenario.probe.environment.audio = AudioSubsystem::None;
    let report = scenario.run();

    assert_eq!(report.status(), RunStatus::StageFailed);
    assert_eq!(report.stages[0], (StageKind::BaseInstall, StageResult::Success));
    assert!(matches!(
        report.stages[1],
        (StageKind::Sound, StageResult::Failed(StageError::Precondition(_)))
    ));
    assert_eq!(report.stages.len(), 2);
    assert!(report.rollback.is_some());
    assert!(!scenario.host.installed.contains("xrdp"));
    assert!(scenario
        .events
        .iter()
        .any(|event| matches!(event, ProgressEvent::RollbackStarted)));
    assert_eq!(
        scenario.ledger.current_mode().expect("mode"),
        InstallationMode::None
    );
}

#[test]
fn failed_compensation_is_reported_not_raised() {
    let mut scenario = Scenario::new(RequestedMode::Standard);
    scenario.request.enable_sound = true;
    scenario.probe.environment.audio = AudioSubsystem::None;
    scenario.host.fail_on("apt-get purge");
    let report = scenario.run();

    assert_eq!(report.status(), RunStatus::StageFailed);
    let rollback = report.rollback.as_ref().expect("rollback ran");
    assert!(!rollback.is_complete());
    assert_eq!(rollback.failures.len(), 1);
    assert!(rollback.failures[0].contains("xrdp"));
    assert_eq!(scenario.last_entry().rollback_complete, Some(false));
}

#[test]
fn clone_failure_rolls_back_prerequisites() {
    let mut scenario = Scenario::new(RequestedMode::Custom);
    scenario.host.fail_on("git clone");
    let report = scenario.run();

    let (kind, err) = report.failure().expect("failure");
    assert_eq!(kind, StageKind::BaseInstall);
    assert!(matches!(err, StageError::Process(_)));
    assert!(err.to_string().contains("simulated failure"));
    assert!(!scenario.host.installed.contains("checkinstall"));
    assert!(scenario.host.installed.contains("git"));
}

#[test]
fn removal_with_flags_returns_to_none() {
    let mut scenario = Scenario::new(RequestedMode::Remove);
    scenario.request.enable_sound = true;
    scenario.request.install_cuda_toolkit = true;
    scenario.seed(RequestedMode::Standard);
    scenario.host.installed.insert("xrdp".to_string());
    scenario.host.files.insert(
        scenario.paths.xsessionrc.clone(),
        "# Managed by xrdp-setup\nexport XDG_CURRENT_DESKTOP=ubuntu:GNOME\n".to_string(),
    );
    scenario
        .host
        .files
        .insert(scenario.paths.xsession.clone(), "exec my-session\n".to_string());

    let report = scenario.run();

    assert_eq!(report.status(), RunStatus::Succeeded);
    assert_eq!(stage_kinds(&report), vec![(StageKind::Removal, "done")]);
    assert!(report.rollback.is_none());
    assert!(scenario
        .host
        .labels()
        .contains(&"sudo apt-get purge -y xrdp".to_string()));
    assert!(!scenario.host.installed.contains("xrdp"));
    assert!(!scenario.host.files.contains_key(&scenario.paths.xsessionrc));
    assert!(scenario.host.files.contains_key(&scenario.paths.xsession));
    assert_eq!(
        scenario.ledger.current_mode().expect("mode"),
        InstallationMode::None
    );
}

#[test]
fn removal_failure_is_recorded_as_indeterminate() {
    let mut scenario = Scenario::new(RequestedMode::Remove);
    scenario.seed(RequestedMode::Custom);
    scenario.host.installed.insert("xrdp".to_string());
    scenario.host.installed.insert("xorgxrdp".to_string());
    scenario.host.fail_on("apt-get purge");

    let report = scenario.run();

    assert_eq!(report.status(), RunStatus::RemovalFailed);
    assert!(report.rollback.is_none());
    let entry = scenario.last_entry();
    assert_eq!(entry.resulting, ResultingMode::Failed);
    assert!(entry.summary.starts_with("indeterminate state"));
    assert_eq!(entry.rollback_complete, None);
    assert_eq!(
        scenario.ledger.current_mode().expect("mode"),
        InstallationMode::Custom
    );
}

#[test]
fn removal_tolerates_missing_units() {
    let mut scenario = Scenario::new(RequestedMode::Remove);
    scenario.host.fail_on("systemctl disable");
    let report = scenario.run();

    assert_eq!(report.status(), RunStatus::Succeeded);
    assert_eq!(
        scenario.ledger.current_mode().expect("mode"),
        InstallationMode::None
    );
}

#[test]
fn repair_rollback_keeps_a_module_installed_before_the_run() {
    let mut scenario = Scenario::new(RequestedMode::Standard);
    scenario.seed(RequestedMode::Standard);
    scenario.request.enable_sound = true;
    scenario.request.install_cuda_toolkit = true;
    scenario.host.installed.insert("xrdp".to_string());
    let tree = scenario.source_dir("pipewire-module-xrdp");
    let makefile = tree.join("Makefile");
    scenario.host.dirs.insert(tree.clone());
    scenario
        .host
        .files
        .insert(makefile.clone(), "install:\n".to_string());

    let report = scenario.run();

    assert_eq!(report.status(), RunStatus::StageFailed);
    assert_eq!(
        report.failure().map(|(kind, _)| kind),
        Some(StageKind::GpuToolkit)
    );
    assert!(report.rollback.as_ref().expect("rollback ran").is_complete());
    assert!(!scenario
        .host
        .labels()
        .iter()
        .any(|label| label.contains("make uninstall")));
    assert!(scenario.host.dirs.contains(&tree));
    assert_eq!(
        scenario.host.files.get(&makefile).map(String::as_str),
        Some("install:\n")
    );
    assert!(!scenario.host.dirs.contains(&backup_path(&tree)));
    assert!(scenario.host.installed.contains("xrdp"));
    assert_eq!(
        scenario.ledger.current_mode().expect("mode"),
        InstallationMode::Standard
    );
}

#[test]
fn successful_run_discards_the_parked_tree() {
    let mut scenario = Scenario::new(RequestedMode::Standard);
    scenario.request.enable_sound = true;
    // Left behind by an earlier attempt that never configured it.
    let tree = scenario.source_dir("pipewire-module-xrdp");
    scenario.host.dirs.insert(tree.clone());

    let report = scenario.run();

    assert_eq!(report.status(), RunStatus::Succeeded);
    assert!(scenario
        .host
        .labels()
        .iter()
        .any(|label| label.starts_with("sudo mv -T") && label.contains("pipewire-module-xrdp")));
    assert!(scenario.host.dirs.contains(&tree));
    assert!(!scenario.host.dirs.contains(&backup_path(&tree)));
}

#[test]
fn unwritable_ledger_directory_stops_before_any_stage() {
    let mut scenario = Scenario::new(RequestedMode::Standard);
    let missing = scenario
        .config
        .ledger
        .path
        .with_file_name("missing")
        .join("ledger.jsonl");
    scenario.config.ledger.path = missing.clone();
    scenario.ledger = Ledger::new(missing.clone());

    let report = scenario.run();

    assert_eq!(report.status(), RunStatus::LedgerWriteFailed);
    assert_eq!(report.status().exit_code(), 6);
    assert!(report.stages.is_empty());
    assert!(report.rollback.is_none());
    let labels = scenario.host.labels();
    assert_eq!(labels.len(), 1, "{labels:?}");
    assert!(labels[0].starts_with("sudo install -d -m 755 -o 1000 -g 1000"));
    assert!(!scenario.host.installed.contains("xrdp"));
    assert!(!missing.exists());
}

#[test]
fn ledger_append_failure_after_stages_is_reported() {
    let mut scenario = Scenario::new(RequestedMode::Standard);
    let ledger_path = scenario.config.ledger.path.clone();
    // Replace the ledger location with a directory once the last stage runs.
    scenario.host.on_command("systemctl restart", move || {
        fs::create_dir(&ledger_path).expect("block ledger path");
    });

    let report = scenario.run();

    assert_eq!(report.status(), RunStatus::LedgerWriteFailed);
    assert!(report.failure().is_none());
    assert!(report.rollback.is_none());
    assert_eq!(
        report.stages.last(),
        Some(&(StageKind::Finalize, StageResult::Success))
    );
    let reason = report.ledger_error.as_deref().expect("ledger error");
    assert!(reason.contains("failed to write ledger"), "{reason}");
    assert!(scenario.host.installed.contains("xrdp"));
}

#[test]
fn pulseaudio_module_builds_against_distribution_sources() {
    let mut scenario = Scenario::new(RequestedMode::Standard);
    scenario.request.enable_sound = true;
    scenario.probe.environment.audio = AudioSubsystem::PulseAudio;

    let report = scenario.run();

    assert_eq!(report.status(), RunStatus::Succeeded);
    assert_eq!(report.stages[1], (StageKind::Sound, StageResult::Success));
    let module = scenario.source_dir("pulseaudio-module-xrdp");
    let sources = scenario.source_dir("pulseaudio.src");
    assert!(scenario.host.dirs.contains(&module));
    assert!(scenario.host.dirs.contains(&sources));

    let fetch = scenario
        .host
        .commands
        .iter()
        .find(|command| command.program == "./scripts/install_pulseaudio_sources_apt.sh")
        .expect("sources fetched");
    assert_eq!(fetch.cwd.as_ref(), Some(&module));
    let configure = scenario
        .host
        .commands
        .iter()
        .find(|command| command.program == "./configure" && command.cwd.as_ref() == Some(&module))
        .expect("module configured");
    assert!(configure
        .env
        .contains(&("PULSE_DIR".to_string(), sources.display().to_string())));
    assert!(scenario.host.installed.contains("libpulse-dev"));
    assert!(scenario
        .host
        .labels()
        .contains(&"sudo make install".to_string()));
}

#[test]
fn cuda_toolkit_installs_with_a_loaded_driver() {
    let mut scenario = Scenario::new(RequestedMode::Standard);
    scenario.request.install_cuda_toolkit = true;
    scenario.probe.gpu_driver = true;

    let report = scenario.run();

    assert_eq!(report.status(), RunStatus::Succeeded);
    assert_eq!(report.stages[2], (StageKind::GpuToolkit, StageResult::Success));
    let labels = scenario.host.labels();
    assert!(labels
        .iter()
        .any(|label| label.starts_with("wget -q -O") && label.contains("/ubuntu2404/")));
    assert!(labels
        .iter()
        .any(|label| label.starts_with("sudo dpkg -i") && label.ends_with("cuda-keyring_1.1-1_all.deb")));
    assert!(scenario.host.installed.contains("cuda-keyring"));
    assert!(scenario.host.installed.contains("cuda-toolkit"));
    assert!(scenario.last_entry().flags.cuda);
}

#[test]
fn finalize_failure_restores_existing_session_files() {
    let mut scenario = Scenario::new(RequestedMode::Standard);
    scenario.request.install_cuda_toolkit = true;
    scenario.probe.gpu_driver = true;
    scenario
        .host
        .files
        .insert(scenario.paths.xsessionrc.clone(), "export LANG=C\n".to_string());
    scenario.host.files.insert(
        scenario.paths.xwrapper.clone(),
        "allowed_users=console\n".to_string(),
    );
    scenario.host.fail_on("systemctl restart");

    let report = scenario.run();

    assert_eq!(report.status(), RunStatus::StageFailed);
    assert_eq!(
        report.failure().map(|(kind, _)| kind),
        Some(StageKind::Finalize)
    );
    assert!(report.rollback.as_ref().expect("rollback ran").is_complete());
    assert_eq!(
        scenario
            .host
            .files
            .get(&scenario.paths.xsessionrc)
            .map(String::as_str),
        Some("export LANG=C\n")
    );
    assert_eq!(
        scenario
            .host
            .files
            .get(&scenario.paths.xwrapper)
            .map(String::as_str),
        Some("allowed_users=console\n")
    );
    assert!(!scenario.host.files.contains_key(&scenario.paths.xsession));
    assert!(scenario.host.enabled_units.is_empty());
    for package in ["xrdp", "gnome-tweaks", "cuda-keyring", "cuda-toolkit"] {
        assert!(
            !scenario.host.installed.contains(package),
            "{package} left installed"
        );
    }
    assert_eq!(
        scenario.ledger.current_mode().expect("mode"),
        InstallationMode::None
    );
}
