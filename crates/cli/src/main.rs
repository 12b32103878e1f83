use std::io::{BufRead, Read, Write};
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use scoop_backup_core::config::{self, Settings};
use scoop_backup_core::run_log::{self, RunLogGuard};
use scoop_backup_core::{
    APP_NAME, BackupManager, Choice, Cipher, CommandSnapshotSource, DeleteReport, GistStore,
    GistStoreConfig, ManageOutcome, PresetSelection, ProgressSink, RestoreOutcome, Selection,
    TaskProgress,
};

#[derive(Parser)]
#[command(name = "scoopbackup")]
#[command(about = "Encrypted Scoop configuration backups in GitHub Gists", long_about = None)]
struct Cli {
    #[arg(long)]
    json: bool,

    #[arg(long)]
    events: bool,

    #[arg(long, env = "SCOOPBACKUP_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[arg(long, env = "SCOOPBACKUP_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Passphrase used to encrypt and decrypt payloads.
    #[arg(long, env = "SCOOPBACKUP_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Bearer token for the gist API.
    #[arg(long, env = "SCOOPBACKUP_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export, encrypt and upload one snapshot.
    Backup,
    /// Download, decrypt and import a chosen snapshot.
    Restore {
        /// Restore this backup id instead of prompting.
        #[arg(long)]
        id: Option<String>,
    },
    /// Delete chosen backups.
    Manage {
        /// Delete these backup ids instead of prompting.
        #[arg(long = "delete", value_name = "ID")]
        delete: Vec<String>,
    },
    /// Backup, then prune older backups per the retention settings.
    Scheduled,
    /// List backups owned by this tool.
    List,
    Settings {
        #[command(subcommand)]
        cmd: SettingsCmd,
    },
}

#[derive(Subcommand)]
enum SettingsCmd {
    Get,
    Set,
}

struct Host {
    config_dir: PathBuf,
    data_dir: PathBuf,
    secret: Option<String>,
    token: Option<String>,
    json: bool,
    events: bool,
}

#[derive(Debug, serde::Serialize)]
struct CliError {
    code: &'static str,
    message: String,
    details: serde_json::Value,
    retryable: bool,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: false,
        }
    }

    fn retryable(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: true,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

struct NdjsonProgressSink {
    task_id: String,
}

impl ProgressSink for NdjsonProgressSink {
    fn on_progress(&self, p: TaskProgress) {
        let line = serde_json::json!({
            "type": "task.progress",
            "taskId": self.task_id,
            "phase": p.phase,
            "objectId": p.object_id,
            "itemsTotal": p.items_total,
            "itemsDone": p.items_done,
        });
        println!("{line}");
    }
}

/// Prompts on stderr and reads answers from stdin.
struct PromptSelection;

impl PromptSelection {
    fn show(title: &str, choices: &[Choice]) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{title}");
        for (i, c) in choices.iter().enumerate() {
            let _ = writeln!(err, "  {:>2}) {}  [{}]", i + 1, c.label, c.id);
        }
    }

    /// `None` on end of input or `q`.
    fn read_answer(prompt: &str) -> scoop_backup_core::Result<Option<String>> {
        {
            let mut err = std::io::stderr().lock();
            let _ = write!(err, "{prompt}");
            let _ = err.flush();
        }
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let line = line.trim();
        if line.eq_ignore_ascii_case("q") {
            return Ok(None);
        }
        Ok(Some(line.to_string()))
    }

    fn pick(token: &str, choices: &[Choice]) -> scoop_backup_core::Result<String> {
        token
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| choices.get(i))
            .map(|c| c.id.clone())
            .ok_or_else(|| scoop_backup_core::Error::UnknownBackup {
                id: token.to_string(),
            })
    }
}

impl Selection for PromptSelection {
    fn choose_one(
        &self,
        title: &str,
        choices: &[Choice],
    ) -> scoop_backup_core::Result<Option<String>> {
        Self::show(title, choices);
        match Self::read_answer("number (empty or q to cancel): ")? {
            Some(answer) if !answer.is_empty() => Self::pick(&answer, choices).map(Some),
            _ => Ok(None),
        }
    }

    fn choose_many(
        &self,
        title: &str,
        choices: &[Choice],
    ) -> scoop_backup_core::Result<Option<Vec<String>>> {
        Self::show(title, choices);
        let prompt = "numbers separated by spaces or commas (q to cancel): ";
        let Some(answer) = Self::read_answer(prompt)? else {
            return Ok(None);
        };
        answer
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(|t| Self::pick(t, choices))
            .collect::<scoop_backup_core::Result<Vec<_>>>()
            .map(Some)
    }
}

enum HostSelection {
    Preset(PresetSelection),
    Prompt(PromptSelection),
}

impl Selection for HostSelection {
    fn choose_one(
        &self,
        title: &str,
        choices: &[Choice],
    ) -> scoop_backup_core::Result<Option<String>> {
        match self {
            Self::Preset(p) => p.choose_one(title, choices),
            Self::Prompt(p) => p.choose_one(title, choices),
        }
    }

    fn choose_many(
        &self,
        title: &str,
        choices: &[Choice],
    ) -> scoop_backup_core::Result<Option<Vec<String>>> {
        match self {
            Self::Preset(p) => p.choose_many(title, choices),
            Self::Prompt(p) => p.choose_many(title, choices),
        }
    }
}

type Manager = BackupManager<GistStore, CommandSnapshotSource, HostSelection>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            emit_error(&e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let host = Host {
        config_dir: cli.config_dir.unwrap_or_else(default_config_dir),
        data_dir: cli.data_dir.unwrap_or_else(default_data_dir),
        secret: cli.secret,
        token: cli.token,
        json: cli.json,
        events: cli.events,
    };

    match cli.cmd {
        Command::Backup => backup_run(&host).await,
        Command::Restore { id } => {
            let selection = match id {
                Some(id) => HostSelection::Preset(PresetSelection::new([id])),
                None => HostSelection::Prompt(PromptSelection),
            };
            restore_run(&host, selection).await
        }
        Command::Manage { delete } => {
            let selection = if delete.is_empty() {
                HostSelection::Prompt(PromptSelection)
            } else {
                HostSelection::Preset(PresetSelection::new(delete))
            };
            manage_run(&host, selection).await
        }
        Command::Scheduled => scheduled_run(&host).await,
        Command::List => list_run(&host).await,
        Command::Settings { cmd } => match cmd {
            SettingsCmd::Get => settings_get(&host),
            SettingsCmd::Set => settings_set(&host),
        },
    }
}

fn settings_get(host: &Host) -> Result<(), CliError> {
    let settings = config::load_settings(&host.config_dir).map_err(map_core_err)?;
    let secret_present = Cipher::new(host.secret.clone()).is_configured();
    let token_present = host.token.as_deref().is_some_and(|s| !s.is_empty());

    if host.json {
        println!(
            "{}",
            serde_json::json!({
                "settings": settings,
                "secrets": { "secretPresent": secret_present, "tokenPresent": token_present }
            })
        );
    } else {
        let text = config::to_toml(&settings).map_err(map_core_err)?;
        print!("{text}");
        if !text.ends_with('\n') {
            println!();
        }
        println!();
        println!("secretPresent={secret_present}");
        println!("tokenPresent={token_present}");
    }
    Ok(())
}

fn settings_set(host: &Host) -> Result<(), CliError> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| CliError::new("io.failed", e.to_string()))?;

    let settings: Settings = config::parse_settings(&input)
        .map_err(|e| CliError::new("config.invalid", e.to_string()))?;
    config::save_settings(&host.config_dir, &settings).map_err(map_core_err)?;

    if host.json {
        println!("{}", serde_json::json!({ "settings": settings }));
    }
    Ok(())
}

async fn backup_run(host: &Host) -> Result<(), CliError> {
    let task_id = new_task_id();
    let _log = start_log(host, "backup", &task_id)?;
    let started = Instant::now();
    emit_state(host, &task_id, "backup", "running", serde_json::json!({}));

    let manager = build_manager(
        host,
        HostSelection::Preset(PresetSelection::cancelled()),
        &task_id,
    )?;
    let res = manager.backup().await;
    log_finish("backup", &task_id, started, res.as_ref().err());
    let out = res.map_err(map_core_err)?;

    emit_state(
        host,
        &task_id,
        "backup",
        "succeeded",
        serde_json::json!({ "backupId": out.id }),
    );
    if host.events {
        return Ok(());
    }
    if host.json {
        println!("{}", to_json(&out)?);
    } else {
        println!("backupId={}", out.id);
        println!("filename={}", out.filename);
        println!("label={}", out.label);
    }
    Ok(())
}

async fn list_run(host: &Host) -> Result<(), CliError> {
    let manager = build_manager(
        host,
        HostSelection::Preset(PresetSelection::cancelled()),
        "list",
    )?;
    let entries = manager.list().await.map_err(map_core_err)?;

    let out: Vec<serde_json::Value> = entries
        .iter()
        .map(|e| {
            serde_json::json!({
                "id": e.id,
                "label": e.label,
                "filename": e.payload().map(|c| c.filename.clone()),
                "createdAt": e.created_at().map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string()),
            })
        })
        .collect();

    if host.json {
        println!("{}", serde_json::json!({ "backups": out }));
    } else if entries.is_empty() {
        println!("no backups");
    } else {
        for e in &entries {
            println!("{}\t{}", e.id, e.label);
        }
    }
    Ok(())
}

async fn restore_run(host: &Host, selection: HostSelection) -> Result<(), CliError> {
    let task_id = new_task_id();
    let _log = start_log(host, "restore", &task_id)?;
    let started = Instant::now();
    emit_state(host, &task_id, "restore", "running", serde_json::json!({}));

    let manager = build_manager(host, selection, &task_id)?;
    let res = manager.restore().await;
    log_finish("restore", &task_id, started, res.as_ref().err());
    let out = res.map_err(map_core_err)?;

    emit_state(host, &task_id, "restore", "succeeded", restore_state(&out));
    if host.events {
        return Ok(());
    }
    if host.json {
        println!("{}", to_json(&out)?);
        return Ok(());
    }
    match out {
        RestoreOutcome::Restored { id, label } => println!("restored id={id} label={label}"),
        RestoreOutcome::NothingToRestore => println!("no backups to restore"),
        RestoreOutcome::Cancelled => println!("cancelled"),
    }
    Ok(())
}

async fn manage_run(host: &Host, selection: HostSelection) -> Result<(), CliError> {
    let task_id = new_task_id();
    let _log = start_log(host, "manage", &task_id)?;
    let started = Instant::now();
    emit_state(host, &task_id, "manage", "running", serde_json::json!({}));

    let manager = build_manager(host, selection, &task_id)?;
    let res = manager.manage().await;
    log_finish("manage", &task_id, started, res.as_ref().err());
    let out = res.map_err(map_core_err)?;

    if host.json {
        println!("{}", to_json(&out)?);
    } else {
        match &out {
            ManageOutcome::Deleted(report) => print_report(report),
            ManageOutcome::NoBackups => println!("no backups"),
            ManageOutcome::Cancelled => println!("cancelled"),
            ManageOutcome::NothingSelected => println!("nothing selected"),
        }
    }

    if let ManageOutcome::Deleted(report) = &out {
        partial_failure(report)?;
    }
    emit_state(host, &task_id, "manage", "succeeded", manage_state(&out));
    Ok(())
}

fn restore_state(out: &RestoreOutcome) -> serde_json::Value {
    match out {
        RestoreOutcome::Restored { id, .. } => {
            serde_json::json!({ "outcome": "restored", "backupId": id })
        }
        RestoreOutcome::NothingToRestore => serde_json::json!({ "outcome": "nothing_to_restore" }),
        RestoreOutcome::Cancelled => serde_json::json!({ "outcome": "cancelled" }),
    }
}

fn manage_state(out: &ManageOutcome) -> serde_json::Value {
    match out {
        ManageOutcome::Deleted(report) => {
            serde_json::json!({ "outcome": "deleted", "deleted": report.deleted.len() })
        }
        ManageOutcome::NoBackups => serde_json::json!({ "outcome": "no_backups" }),
        ManageOutcome::Cancelled => serde_json::json!({ "outcome": "cancelled" }),
        ManageOutcome::NothingSelected => serde_json::json!({ "outcome": "nothing_selected" }),
    }
}

async fn scheduled_run(host: &Host) -> Result<(), CliError> {
    let task_id = new_task_id();
    let _log = start_log(host, "scheduled", &task_id)?;
    let started = Instant::now();
    emit_state(host, &task_id, "scheduled", "running", serde_json::json!({}));

    let manager = build_manager(
        host,
        HostSelection::Preset(PresetSelection::cancelled()),
        &task_id,
    )?;
    let res = manager.scheduled().await;
    log_finish("scheduled", &task_id, started, res.as_ref().err());
    let out = res.map_err(map_core_err)?;

    emit_state(
        host,
        &task_id,
        "scheduled",
        "succeeded",
        serde_json::json!({ "backupId": out.backup.id, "pruned": out.pruned_count() }),
    );
    if host.events {
        return Ok(());
    }
    if host.json {
        println!("{}", to_json(&out)?);
    } else {
        println!("backupId={}", out.backup.id);
        println!("kept={}", out.kept.join(","));
        print_report(&out.pruned);
    }
    Ok(())
}

fn build_manager(
    host: &Host,
    selection: HostSelection,
    task_id: &str,
) -> Result<Manager, CliError> {
    let settings = config::load_settings(&host.config_dir).map_err(map_core_err)?;

    let store = GistStore::new(GistStoreConfig {
        api_base: settings.store.api_base.clone(),
        token: host.token.clone().unwrap_or_default(),
        user_agent: settings.store.user_agent.clone(),
    })
    .map_err(map_core_err)?;
    let source = CommandSnapshotSource::new(settings.snapshot.program.clone());
    let cipher = Cipher::new(host.secret.clone());

    let mgr_config = settings.manager_config(host.data_dir.join("cache"));
    mgr_config.validate().map_err(map_core_err)?;

    let manager = BackupManager::new(store, source, selection, cipher, mgr_config);
    if host.events {
        return Ok(manager.with_progress(Box::new(NdjsonProgressSink {
            task_id: task_id.to_string(),
        })));
    }
    Ok(manager)
}

fn print_report(report: &DeleteReport) {
    for id in &report.deleted {
        println!("deleted {id}");
    }
    for f in &report.failed {
        println!("failed {} ({})", f.id, f.message);
    }
}

fn partial_failure(report: &DeleteReport) -> Result<(), CliError> {
    if report.is_clean() {
        return Ok(());
    }
    let failed: Vec<&str> = report.failed.iter().map(|f| f.id.as_str()).collect();
    Err(CliError::new(
        "delete.partial",
        format!("{} of {} deletes failed", failed.len(), failed.len() + report.deleted.len()),
    )
    .with_details(serde_json::json!({ "failed": failed, "deleted": report.deleted })))
}

fn new_task_id() -> String {
    format!("tsk_{}", uuid::Uuid::new_v4())
}

fn start_log(host: &Host, kind: &'static str, task_id: &str) -> Result<RunLogGuard, CliError> {
    let guard = run_log::start_run_log(kind, task_id, &host.data_dir)
        .map_err(|e| CliError::new("io.failed", format!("run log: {e}")))?;
    tracing::info!(
        event = "run.start",
        kind,
        run_id = %task_id,
        log_path = %guard.path().display(),
        "run.start"
    );
    Ok(guard)
}

fn log_finish(
    kind: &'static str,
    task_id: &str,
    started: Instant,
    err: Option<&scoop_backup_core::Error>,
) {
    let duration_seconds = started.elapsed().as_secs_f64();
    match err {
        None => tracing::info!(
            event = "run.finish",
            kind,
            run_id = %task_id,
            status = "succeeded",
            duration_seconds,
            "run.finish"
        ),
        Some(e) => tracing::error!(
            event = "run.finish",
            kind,
            run_id = %task_id,
            status = "failed",
            duration_seconds,
            error = %e,
            "run.finish"
        ),
    }
}

fn emit_state(host: &Host, task_id: &str, kind: &str, state: &str, extra: serde_json::Value) {
    if !host.events {
        return;
    }
    let mut line = serde_json::json!({
        "type": "task.state",
        "taskId": task_id,
        "kind": kind,
        "state": state,
    });
    if let (Some(obj), serde_json::Value::Object(extra)) = (line.as_object_mut(), extra) {
        obj.extend(extra);
    }
    println!("{line}");
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, CliError> {
    serde_json::to_string(value).map_err(|e| CliError::new("io.failed", e.to_string()))
}

fn default_config_dir() -> PathBuf {
    if let Ok(appdata) = std::env::var("APPDATA") {
        return PathBuf::from(appdata).join(APP_NAME);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join(APP_NAME)
}

fn default_data_dir() -> PathBuf {
    default_config_dir()
}

fn map_core_err(e: scoop_backup_core::Error) -> CliError {
    use scoop_backup_core::Error;
    match e {
        Error::Configuration { message } => CliError::new("config.invalid", message),
        Error::Export { message } => CliError::new("snapshot.export_failed", message),
        Error::Import { message } => CliError::new("snapshot.import_failed", message),
        Error::Remote { message } => CliError::retryable("remote.failed", message),
        e @ Error::Decryption => CliError::new("crypto.decrypt_failed", e.to_string()),
        Error::Encryption { message } => CliError::new("crypto.encrypt_failed", message),
        e @ (Error::UnknownBackup { .. } | Error::MissingPayload { .. }) => {
            CliError::new("backup.not_found", e.to_string())
        }
        Error::Io(e) => CliError::new("io.failed", e.to_string()),
        other => CliError::new("unknown", other.to_string()),
    }
}

const ENCODE_FAILED: &str =
    r#"{"code":"unknown","message":"json encode failed","details":{},"retryable":false}"#;

fn emit_error(e: &CliError) {
    let json = serde_json::to_string(e).unwrap_or_else(|_| ENCODE_FAILED.to_string());
    let _ = writeln!(std::io::stderr(), "{json}");
}
