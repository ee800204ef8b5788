use std::fs;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ecosystem_manager::app::App;
use ecosystem_manager::config::{ConfigLoader, ResolvedConfig};
use ecosystem_manager::dao::Dao;
use ecosystem_manager::domain::NameId;
use ecosystem_manager::error::{EcosystemError, Upstream};
use ecosystem_manager::github::GithubHttpClient;
use ecosystem_manager::http::{HttpClient, ResponseCache};
use ecosystem_manager::julia::JuliaHttpClient;
use ecosystem_manager::labels::{LABELS_TOML, LabelsToml};
use ecosystem_manager::output::{JsonOutput, LogSink};
use ecosystem_manager::pypi::PypiHttpClient;
use ecosystem_manager::shortener::BitlyClient;
use ecosystem_manager::submission::LabelMap;

#[derive(Parser)]
#[command(name = "ecosystem")]
#[command(about = "Maintain the ecosystem member directory")]
#[command(version, author)]
struct Cli {
    /// Path to ecosystem.toml
    #[arg(long, global = true)]
    config: Option<String>,

    /// Overrides the resources directory from the config
    #[arg(long, global = true)]
    resources: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Manage directory members")]
    Members(MembersArgs),
}

#[derive(Args)]
struct MembersArgs {
    #[command(subcommand)]
    command: MembersCommand,
}

#[derive(Subcommand)]
enum MembersCommand {
    #[command(about = "Add or update a member from a submission issue body")]
    Add(AddArgs),
    #[command(about = "Refresh GitHub metadata of every member")]
    UpdateGithub,
    #[command(about = "Refresh PyPI metadata and compatibility of every member")]
    UpdatePypi,
    #[command(about = "Refresh Julia metadata of every member")]
    UpdateJulia,
    #[command(about = "Mint missing badge links")]
    UpdateBadges,
    #[command(about = "Write shields.io endpoint files for every badge")]
    BadgeEndpoints(DirArgs),
    #[command(about = "Compile members and labels into one JSON file")]
    Compile(OutputArgs),
    #[command(about = "Validate members against labels.toml")]
    Validate,
    #[command(about = "Show one member")]
    Show(ShowArgs),
    #[command(about = "Delete one member")]
    Delete(ShowArgs),
}

#[derive(Args)]
struct AddArgs {
    /// File holding the issue body; stdin when omitted
    #[arg(long)]
    body_file: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct DirArgs {
    dir: Utf8PathBuf,
}

#[derive(Args)]
struct OutputArgs {
    #[arg(long, default_value = "members.json")]
    output: Utf8PathBuf,
}

#[derive(Args)]
struct ShowArgs {
    name_id: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<EcosystemError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &EcosystemError) -> u8 {
    match error {
        EcosystemError::MemberNotFound(_)
        | EcosystemError::InvalidSourceUrl { .. }
        | EcosystemError::InvalidUrl(_)
        | EcosystemError::InvalidNameId(_)
        | EcosystemError::InvalidPackageName(_)
        | EcosystemError::InvalidSpecifier(_)
        | EcosystemError::SubmissionParse(_)
        | EcosystemError::MissingCredential(_) => 2,
        err if err.is_upstream() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(resources) = cli.resources {
        config.resources_dir = resources;
    }

    match cli.command {
        Commands::Members(args) => run_members(args.command, &config),
    }
}

type HttpApp = App<GithubHttpClient, PypiHttpClient, JuliaHttpClient>;

fn build_app(config: &ResolvedConfig) -> Result<HttpApp, EcosystemError> {
    let github = GithubHttpClient::with_cache(
        config.http_timeout,
        config.github_token.as_deref(),
        ResponseCache::new(config.github_cache_ttl),
    )?;
    let pypi = HttpClient::new(Upstream::Pypi, config.http_timeout, None, None)?;
    let julia = HttpClient::new(Upstream::Julia, config.http_timeout, None, None)?;
    Ok(App::new(
        Dao::new(&config.resources_dir),
        github,
        PypiHttpClient::new(pypi),
        JuliaHttpClient::new(julia),
    ))
}

fn run_members(command: MembersCommand, config: &ResolvedConfig) -> miette::Result<()> {
    let app = build_app(config)?;
    let sink = LogSink;
    match command {
        MembersCommand::Add(args) => {
            let body = match args.body_file {
                Some(path) => fs::read_to_string(path.as_std_path()).into_diagnostic()?,
                None => std::io::read_to_string(std::io::stdin()).into_diagnostic()?,
            };
            let result = app.add_from_issue(&body, &LabelMap::default(), &sink)?;
            JsonOutput::print(&result).into_diagnostic()
        }
        MembersCommand::UpdateGithub => {
            let report = app.refresh_github(&sink)?;
            JsonOutput::print(&report).into_diagnostic()
        }
        MembersCommand::UpdatePypi => {
            let releases = match app.release_table(
                &config.release_table_path,
                &config.reference_package,
                config.release_table_max_age,
            ) {
                Ok(table) => Some(table),
                Err(err) => {
                    tracing::warn!(error = %err, "compatibility will not be recomputed");
                    None
                }
            };
            let report = app.refresh_pypi(releases.as_ref(), &sink)?;
            JsonOutput::print(&report).into_diagnostic()
        }
        MembersCommand::UpdateJulia => {
            let report = app.refresh_julia(&sink)?;
            JsonOutput::print(&report).into_diagnostic()
        }
        MembersCommand::UpdateBadges => {
            let token = config.require_bitly_token()?;
            let http = HttpClient::new(Upstream::Shortener, config.http_timeout, Some(token), None)?;
            let shortener = BitlyClient::new(http, config.badge.clone());
            let report = app.mint_badges(&shortener, &sink)?;
            JsonOutput::print(&report).into_diagnostic()
        }
        MembersCommand::BadgeEndpoints(args) => {
            let result = app.write_badge_endpoints(&args.dir, &sink)?;
            JsonOutput::print(&result).into_diagnostic()
        }
        MembersCommand::Compile(args) => {
            let result = app.compile_json(&args.output, &sink)?;
            JsonOutput::print(&result).into_diagnostic()
        }
        MembersCommand::Validate => {
            let vocabulary = LabelsToml::load(&config.resources_dir.join(LABELS_TOML))?;
            let result = app.validate(&vocabulary)?;
            JsonOutput::print(&result).into_diagnostic()?;
            if result.is_valid() {
                Ok(())
            } else {
                Err(miette::Report::msg("some members failed validation"))
            }
        }
        MembersCommand::Show(args) => {
            let name_id: NameId = args.name_id.parse()?;
            let member = app
                .dao()
                .get_by_name_id(&name_id)?
                .ok_or_else(|| EcosystemError::MemberNotFound(name_id.to_string()))?;
            JsonOutput::print(&member.to_record()?).into_diagnostic()
        }
        MembersCommand::Delete(args) => {
            let name_id: NameId = args.name_id.parse()?;
            let member = app.dao().delete(&name_id)?;
            JsonOutput::print(&member.to_record()?).into_diagnostic()
        }
    }
}
