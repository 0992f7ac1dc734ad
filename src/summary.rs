//! Console output for the coordinator
//!
//! A header at startup and a short block after each search.

use crate::master::SearchOutcome;
use crate::shard::Database;
use crate::stats::PipelineMode;
use console::style;
use humansize::{format_size, BINARY};

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Print the startup header
pub fn print_header(addr: &str, workers: usize, shards: usize, databases: &[Database]) {
    println!();
    println!(
        "{} {}",
        style("shard-master").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Listening:").bold(), addr);
    println!("  {} {} ({} shards)", style("Workers:").bold(), workers, shards);
    for (i, db) in databases.iter().enumerate() {
        println!(
            "  {} {} {} {}, {} {}",
            style(format!("[{}]", i + 1)).bold(),
            db.path().display(),
            style(db.kind()).dim(),
            format_number(db.len() as u64),
            format_number(db.total_length()),
            style("residues").dim(),
        );
    }
    println!();
}

/// Print the result of one search
pub fn print_search_summary(outcome: &SearchOutcome, client: Option<&str>) {
    let verb = match outcome.mode {
        PipelineMode::SearchSeqs => "Search",
        PipelineMode::ScanModels => "Scan",
    };

    println!();
    println!(
        "{} {}",
        style(format!("{} Complete", verb)).green().bold(),
        style(&outcome.query).bold()
    );
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {} (db {})",
        style("Targets:").bold(),
        format_number(outcome.targets),
        outcome.database + 1
    );
    println!(
        "  {} {} ({} reported, {} included)",
        style("Hits:").bold(),
        format_number(outcome.nhits),
        format_number(outcome.nreported),
        format_number(outcome.nincluded)
    );
    println!(
        "  {} {:.3}s ({} chunks, {} batches, {:.2} GCUPS)",
        style("Duration:").bold(),
        outcome.elapsed.as_secs_f64(),
        format_number(outcome.chunks_served),
        format_number(outcome.batches_merged),
        outcome.gcups
    );
    if outcome.stalls > 0 {
        println!(
            "  {} {} stall warning(s) while waiting on workers",
            style("Stalled:").yellow().bold(),
            outcome.stalls
        );
    }
    match (client, outcome.bytes_sent) {
        (Some(addr), Some(bytes)) => {
            println!("  {} {} to {}", style("Sent:").bold(), format_size(bytes, BINARY), addr)
        }
        (Some(addr), None) => println!("  {} {}", style("Send failed:").yellow().bold(), addr),
        (None, _) => {}
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }
}
