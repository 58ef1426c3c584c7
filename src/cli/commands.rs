use crate::converter::{self, ConvertOptions, ConvertReport};
use crate::error::CoaResult;
use crate::fetch::TemplateSource;
use crate::layout::Layout;
use colored::Colorize;
use std::path::{Path, PathBuf};

/// Load the layout override, or the built-in NSF/ADS layout.
pub fn load_layout(path: Option<&Path>) -> CoaResult<Layout> {
    match path {
        Some(path) => Layout::from_yaml_file(path),
        None => Ok(Layout::default()),
    }
}

/// Execute the convert command
pub fn convert(options: ConvertOptions, verbose: bool) -> CoaResult<ConvertReport> {
    println!("{}", "🔥 ads2coa - Filling NSF COA Table 4".bold().green());
    println!("   Affiliations: {}", options.affiliations.display());
    println!("   Template:     {}", options.template.display());
    if options.dry_run {
        println!("   Output:       {}", "(dry run)".yellow());
    } else {
        println!("   Output:       {}", options.output.display());
    }
    println!();

    if verbose {
        println!(
            "{}",
            format!(
                "📖 Reading CSV, filling '{}' table {} ({})...",
                options.layout.template.sheet,
                options.layout.template.table,
                options.layout.template.table_range
            )
            .cyan()
        );
    }

    let report = converter::convert(&options)?;

    if report.template_source == TemplateSource::Downloaded {
        println!("   ⬇️  Downloaded template to {}", options.template.display());
    }
    println!(
        "   {} co-authors written to Table 4 ({})",
        report.rows_written.to_string().bright_blue().bold(),
        report.table_range
    );
    if report.duplicates_dropped > 0 {
        println!(
            "   {} duplicate author/affiliation pairs dropped",
            report.duplicates_dropped.to_string().yellow()
        );
    }
    if report.rows_inserted > 0 {
        println!(
            "   {} rows inserted below the template rows",
            report.rows_inserted.to_string().yellow()
        );
    }
    println!();

    match &report.output {
        Some(path) => {
            println!("{}", "✅ COA workbook written!".bold().green());
            println!("   File: {}", path.display());
            println!("   Review Table 4 and complete the remaining tables by hand.\n");
        }
        None => println!("{}", "📋 Dry run complete - no file written\n".yellow()),
    }

    Ok(report)
}

/// Execute `--print-layout`
pub fn print_layout(layout: &Layout) -> CoaResult<()> {
    print!("{}", layout.to_yaml()?);
    Ok(())
}

/// Output path from `--output`, else derived from `--surname`.
pub fn resolve_output(output: Option<PathBuf>, surname: Option<&str>) -> PathBuf {
    output.unwrap_or_else(|| converter::default_output_name(surname))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_layout_default_and_file() {
        assert_eq!(load_layout(None).unwrap(), Layout::default());

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("layout.yaml");
        std::fs::write(&path, "template:\n  sheet: Other\n").unwrap();
        assert_eq!(load_layout(Some(path.as_path())).unwrap().template.sheet, "Other");
    }

    #[test]
    fn test_load_layout_missing_file() {
        let err = load_layout(Some(Path::new("nope.yaml"))).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_resolve_output_prefers_explicit_path() {
        assert_eq!(
            resolve_output(Some(PathBuf::from("x.xlsx")), Some("Doe")),
            PathBuf::from("x.xlsx")
        );
        assert_eq!(resolve_output(None, Some("Doe")), PathBuf::from("doe_coa.xlsx"));
    }
}
