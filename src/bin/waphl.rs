use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use waphl_tools::config::{
    AccessConfig, ConfigLoader, LimsSettings, MigrationConfig, MigrationSettings,
};
use waphl_tools::error::WaphlError;
use waphl_tools::gcloud::AccessToken;
use waphl_tools::gcs::GcsHttpClient;
use waphl_tools::lims::{self, TiberiusLimsClient};
use waphl_tools::mash;
use waphl_tools::migrate::Migrator;
use waphl_tools::output::{HumanOutput, JsonOutput, OutputMode};
use waphl_tools::phoenix;
use waphl_tools::poppunk::{self, PoppunkCli, SweepOptions};
use waphl_tools::s3::AwsCliS3Client;
use waphl_tools::samplesheet;
use waphl_tools::store::Staging;
use waphl_tools::tables::{TableSync, TableSyncOptions};
use waphl_tools::terra::TerraHttpClient;

#[derive(Parser)]
#[command(name = "waphl")]
#[command(about = "Genomics pipeline utilities: Terra to AWS migration, samplesheets and PopPUNK helpers")]
#[command(version, author)]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Transfer workflow outputs from a Terra workspace to S3")]
    Terra2aws(Terra2awsArgs),
    #[command(about = "Pull Terra tables to TSV and/or push them to S3")]
    Tables(TablesArgs),
    #[command(about = "Pick the best Mash reference and write a PopPUNK input list")]
    MashSummary(MashArgs),
    #[command(about = "Sweep the PopPUNK BGMM component count and tabulate scores")]
    KSweep(KSweepArgs),
    #[command(about = "Create a samplesheet from paired reads in an S3 bucket")]
    Samplesheet(SamplesheetArgs),
    #[command(about = "Rebuild manifest.csv and Phoenix_Summary.tsv for a split PHoeNIx run")]
    PhoenixFix(PhoenixFixArgs),
    #[command(about = "Run a query against the LIMS database and save the results as CSV")]
    LimsQuery(LimsQueryArgs),
}

#[derive(Args)]
struct Terra2awsArgs {
    /// Settings file (defaults to ./waphl.json)
    #[arg(long)]
    config: Option<String>,

    /// Terra billing project name
    #[arg(short, long)]
    project: Option<String>,

    /// Terra workspace name
    #[arg(short, long)]
    workspace: Option<String>,

    /// Only files produced by this workflow are transferred
    #[arg(long)]
    target_workflow: Option<String>,

    /// Workflow name the files are saved under
    #[arg(long)]
    workflow_name: Option<String>,

    /// Patterns extracted from the sample name; the last match wins
    #[arg(long, num_args = 1..)]
    sample_patterns: Option<Vec<String>>,

    /// Target S3 URI
    #[arg(short, long)]
    uri: Option<String>,

    /// Directory to save results under in the bucket (default: data)
    #[arg(short, long)]
    outdir: Option<String>,

    /// Local staging directory (default: current directory)
    #[arg(long)]
    staging_dir: Option<PathBuf>,
}

#[derive(Args)]
struct TablesArgs {
    /// Access file with project_billing, workspace, bucket and dest_s3 columns
    #[arg(short = 'f', long = "access-file")]
    access_file: PathBuf,

    #[arg(long, required = true, num_args = 1..)]
    tables: Vec<String>,

    #[arg(long)]
    pull: bool,

    #[arg(long)]
    push: bool,

    #[arg(long)]
    clean: bool,
}

#[derive(Args)]
struct MashArgs {
    #[arg(long = "mash_table", alias = "mash-table", default_value = "results.txt")]
    table: PathBuf,

    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

#[derive(Args)]
struct KSweepArgs {
    #[arg(long)]
    db: String,

    #[arg(long, default_value_t = 2)]
    min_clusters: u32,

    #[arg(long, default_value_t = 3)]
    max_clusters: u32,

    #[arg(long = "step_size", alias = "step-size", default_value_t = 1)]
    step: u32,

    /// Other arguments passed to poppunk, e.g. '--threads 8'
    #[arg(long = "analysis-args", default_value = "", allow_hyphen_values = true)]
    analysis_args: String,
}

#[derive(Args)]
struct SamplesheetArgs {
    /// URI path to the S3 location containing reads
    bucket_uri: String,

    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

#[derive(Args)]
struct PhoenixFixArgs {
    #[arg(long)]
    bucket: String,

    /// Run location, e.g. workflow/phoenix/runs/<run_name>
    #[arg(long)]
    prefix: String,
}

#[derive(Args)]
struct LimsQueryArgs {
    /// SQL query to run
    #[arg(short, long)]
    query: String,

    /// CSV file for the results
    #[arg(short, long)]
    output: PathBuf,

    /// INI file with SERVER=host,port under [DEFAULT]; wins over --server/--port
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    server: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Login name (defaults to $LIMS_USER); the password is read from $LIMS_PASSWORD
    #[arg(long)]
    user: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<WaphlError>() {
            if error.is_retryable() {
                eprintln!("the failure looks transient; re-running may succeed");
            }
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &WaphlError) -> u8 {
    match error {
        WaphlError::MissingSetting(_)
        | WaphlError::ConfigRead(_)
        | WaphlError::ConfigParse(_)
        | WaphlError::InvalidPattern { .. }
        | WaphlError::InvalidS3Uri(_)
        | WaphlError::InvalidArgument(_) => 2,
        WaphlError::TerraHttp(_)
        | WaphlError::TerraStatus { .. }
        | WaphlError::GcsHttp(_)
        | WaphlError::GcsStatus { .. }
        | WaphlError::S3Command(_)
        | WaphlError::AccessToken(_)
        | WaphlError::MissingTool(_)
        | WaphlError::ToolFailed { .. }
        | WaphlError::Lims(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    match cli.command {
        Commands::Terra2aws(args) => run_terra2aws(args, mode),
        Commands::Tables(args) => run_tables(args, mode),
        Commands::MashSummary(args) => run_mash(args, mode),
        Commands::KSweep(args) => run_sweep(args, mode),
        Commands::Samplesheet(args) => run_samplesheet(args, mode),
        Commands::PhoenixFix(args) => run_phoenix(args, mode),
        Commands::LimsQuery(args) => run_lims(args, mode),
    }
}

fn run_terra2aws(args: Terra2awsArgs, mode: OutputMode) -> miette::Result<()> {
    let file = ConfigLoader::load(args.config.as_deref())?;
    let cli = MigrationSettings {
        project: args.project,
        workspace: args.workspace,
        target_workflow: args.target_workflow,
        workflow_name: args.workflow_name,
        sample_patterns: args.sample_patterns,
        uri: args.uri,
        outdir: args.outdir,
    };
    let config = MigrationConfig::try_from(file.merge(cli))?;

    let staging = match args.staging_dir {
        Some(dir) => Staging::new_with_root(
            camino::Utf8PathBuf::from_path_buf(dir)
                .map_err(|dir| WaphlError::Filesystem(format!("non UTF-8 path {}", dir.display())))?,
        ),
        None => Staging::new()?,
    };
    let token = AccessToken::resolve()?;
    let migrator = Migrator::new(
        staging,
        TerraHttpClient::new(&token)?,
        GcsHttpClient::new(&token)?,
        AwsCliS3Client::new(),
    );
    let report = migrator.run(&config)?;
    match mode {
        OutputMode::Json => JsonOutput::print(&report).into_diagnostic(),
        OutputMode::Human => {
            HumanOutput::print_migration(&report);
            Ok(())
        }
    }
}

fn run_tables(args: TablesArgs, mode: OutputMode) -> miette::Result<()> {
    let access = AccessConfig::load(&args.access_file)?;
    let options = TableSyncOptions {
        pull: args.pull,
        push: args.push,
        clean: args.clean,
    };
    let token = AccessToken::resolve()?;
    let sync = TableSync::new(
        Staging::new()?.root().to_owned(),
        TerraHttpClient::new(&token)?,
        AwsCliS3Client::new(),
    );
    let result = sync.run(&access, &args.tables, options)?;
    match mode {
        OutputMode::Json => JsonOutput::print(&result).into_diagnostic(),
        OutputMode::Human => {
            HumanOutput::print_tables(&result);
            Ok(())
        }
    }
}

fn run_mash(args: MashArgs, mode: OutputMode) -> miette::Result<()> {
    let summary = mash::summarize(&args.table, &args.out_dir)?;
    match mode {
        OutputMode::Json => JsonOutput::print(&summary).into_diagnostic(),
        OutputMode::Human => {
            HumanOutput::print_mash(&summary);
            Ok(())
        }
    }
}

fn run_sweep(args: KSweepArgs, mode: OutputMode) -> miette::Result<()> {
    let options = SweepOptions {
        db: args.db,
        min_clusters: args.min_clusters,
        max_clusters: args.max_clusters,
        step: args.step,
        extra_args: args
            .analysis_args
            .split_whitespace()
            .map(str::to_string)
            .collect(),
    };
    let result = poppunk::sweep(&PoppunkCli::new(), &options)?;
    match mode {
        OutputMode::Json => JsonOutput::print(&result).into_diagnostic(),
        OutputMode::Human => {
            HumanOutput::print_sweep(&result);
            Ok(())
        }
    }
}

fn run_samplesheet(args: SamplesheetArgs, mode: OutputMode) -> miette::Result<()> {
    let result = samplesheet::build(&AwsCliS3Client::new(), &args.bucket_uri, &args.out_dir)?;
    match mode {
        OutputMode::Json => JsonOutput::print(&result).into_diagnostic(),
        OutputMode::Human => {
            HumanOutput::print_samplesheet(&result);
            Ok(())
        }
    }
}

fn run_phoenix(args: PhoenixFixArgs, mode: OutputMode) -> miette::Result<()> {
    let result = phoenix::fix_run(&AwsCliS3Client::new(), &args.bucket, &args.prefix)?;
    match mode {
        OutputMode::Json => JsonOutput::print(&result).into_diagnostic(),
        OutputMode::Human => {
            HumanOutput::print_phoenix(&result);
            Ok(())
        }
    }
}

fn run_lims(args: LimsQueryArgs, mode: OutputMode) -> miette::Result<()> {
    let connection = LimsSettings {
        config: args.config,
        server: args.server,
        port: args.port,
        user: args.user,
    }
    .resolve()?;
    let client = TiberiusLimsClient::new(connection);
    let export = lims::export(&client, &args.query, &args.output)?;
    match mode {
        OutputMode::Json => JsonOutput::print(&export).into_diagnostic(),
        OutputMode::Human => {
            HumanOutput::print_lims(&export);
            Ok(())
        }
    }
}
