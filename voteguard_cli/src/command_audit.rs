use voteguard::{verify_chain, AuditRow};

pub fn command_verify_audit(matches: &clap::ArgMatches) {
    let filename = matches.value_of("INPUT").unwrap();
    let file_bytes = crate::read_file(filename, "verify-audit");

    let rows: Vec<AuditRow> = match serde_json::from_slice(&file_bytes) {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("voteguard verify-audit: unable to parse {}: {}", filename, e);
            std::process::exit(1);
        }
    };

    let report = verify_chain(&rows);
    if report.ok {
        println!("> Audit chain OK ({} rows)", rows.len());
    } else {
        println!(
            "> Audit chain BROKEN: {} violation(s), first at row {}",
            report.violations,
            report.first_violation.unwrap_or(0)
        );
        std::process::exit(1);
    }
}
