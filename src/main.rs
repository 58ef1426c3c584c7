use ads2coa::cli;
use ads2coa::converter::ConvertOptions;
use ads2coa::error::CoaResult;
use ads2coa::excel::DEFAULT_TEMPLATE_FILENAME;
use ads2coa::parser::DEFAULT_AFFILIATIONS_FILENAME;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ads2coa")]
#[command(about = "Fill Table 4 of the NSF COA template from an ADS author-affiliations CSV")]
#[command(long_about = "ads2coa - NSF Collaborators & Other Affiliations helper

Reads the author-affiliations CSV exported from the Astrophysics Data System
(ADS) and writes every unique author/affiliation pair into Table 4 of the NSF
COA spreadsheet template. Rows are added to the table when there are more
co-authors than template rows; everything below the table moves down.

The rest of the form is left for manual completion.

EXAMPLES:
  ads2coa                                   # authorAffiliations.csv → lastname_coa.xlsx
  ads2coa -a ads.csv -s Doe                 # writes doe_coa.xlsx
  ads2coa --fetch-template -o coa.xlsx      # download the template if missing
  ads2coa -n -v                             # check inputs, write nothing
  ads2coa --print-layout > layout.yaml      # dump the layout to customise it

EXIT CODES:
  0 success, 1 other error, 2 file not found, 3 CSV parse error,
  4 template structure error, 5 write error, 6 layout configuration error")]
#[command(version)]
struct Cli {
    /// ADS author-affiliations CSV
    #[arg(short, long, default_value = DEFAULT_AFFILIATIONS_FILENAME)]
    affiliations: PathBuf,

    /// NSF COA template workbook
    #[arg(short, long, default_value = DEFAULT_TEMPLATE_FILENAME, env = "ADS2COA_TEMPLATE")]
    template: PathBuf,

    /// Output workbook (default: <surname>_coa.xlsx, or lastname_coa.xlsx)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Your surname, used to name the default output file
    #[arg(short, long)]
    surname: Option<String>,

    /// YAML file overriding the CSV columns or the Table 4 location
    #[arg(short, long)]
    layout: Option<PathBuf>,

    /// Download the template from NSF if it is missing
    #[arg(long)]
    fetch_template: bool,

    /// Validate inputs and template without writing the output
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Show detailed progress
    #[arg(short, long)]
    verbose: bool,

    /// Print the effective layout as YAML and exit
    #[arg(long)]
    print_layout: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "ads2coa=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> CoaResult<()> {
    let layout = cli::load_layout(cli.layout.as_deref())?;
    if cli.print_layout {
        return cli::print_layout(&layout);
    }

    let options = ConvertOptions {
        affiliations: cli.affiliations,
        template: cli.template,
        output: cli::resolve_output(cli.output, cli.surname.as_deref()),
        layout,
        fetch_template: cli.fetch_template,
        dry_run: cli.dry_run,
    };
    cli::convert(options, cli.verbose)?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "❌".red(), e.to_string().red());
            ExitCode::from(e.exit_code())
        }
    }
}
