use chichester_stats::{load_long, load_wide, PipelineError};
use std::{env, path::Path, process::exit};

fn main() {
    // Expect a persisted CSV and optionally a year label to filter on.
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: {} <TABLE_CSV> [YEAR]", args[0]);
        exit(1);
    }
    let year = args.get(2).map(String::as_str);
    if let Err(e) = inspect_table(Path::new(&args[1]), year) {
        eprintln!("Error: {}", e);
        exit(1);
    }
}

/// Print a persisted table the way the dashboard would see it.
fn inspect_table(path: &Path, year: Option<&str>) -> Result<(), PipelineError> {
    println!("=== {} ===", path.display());

    // long tables have a fixed header; anything else must be wide
    match load_long(path) {
        Ok(Some(records)) => {
            println!("{:<20} | {:<40} | {:<9} | {}", "Year", "Category", "Type", "Value");
            for rec in records.iter().filter(|r| year.map_or(true, |y| r.year == y)) {
                println!(
                    "{:<20} | {:<40} | {:<9} | {}",
                    rec.year, rec.category, rec.kind, rec.value
                );
            }
            return Ok(());
        }
        Ok(None) => {
            println!("no data");
            return Ok(());
        }
        Err(PipelineError::Parse(_)) => {}
        Err(e) => return Err(e),
    }

    let Some(table) = load_wide(path)? else {
        println!("no data");
        return Ok(());
    };
    if let Some(location) = &table.location {
        println!("Location: {}", location);
    }
    for row in table.rows.iter().filter(|r| year.map_or(true, |y| r.year == y)) {
        println!("{}", row.year);
        for (category, cell) in table.categories.iter().zip(&row.cells) {
            match cell {
                Some(v) => println!("  - {:<40} {}", category, v),
                None => println!("  - {:<40} <missing>", category),
            }
        }
    }
    Ok(())
}
