use clap::{App, Arg, SubCommand};

mod command_audit;
mod command_e2e;
mod command_keygen;
mod command_merkle;
mod command_receipt;

fn main() {
    env_logger::init();

    let matches = App::new("VoteGuard CLI")
        .version("0.1")
        .about("Vote-integrity engine verification tools")
        .subcommand(SubCommand::with_name("keygen").about("Generate a deployment signing keypair"))
        .subcommand(
            SubCommand::with_name("verify-audit")
                .about("Verify an exported audit chain (requires no key)")
                .arg(
                    Arg::with_name("INPUT")
                        .index(1)
                        .required(true)
                        .help("Audit chain export in JSON format"),
                ),
        )
        .subcommand(
            SubCommand::with_name("merkle-root")
                .about("Recompute a ballot Merkle root from a leaf list")
                .arg(
                    Arg::with_name("INPUT")
                        .index(1)
                        .required(true)
                        .help("JSON array of hex leaf hashes, in ledger order"),
                )
                .arg(
                    Arg::with_name("prove")
                        .long("prove")
                        .takes_value(true)
                        .help("Also emit an inclusion proof for the leaf at this index"),
                ),
        )
        .subcommand(
            SubCommand::with_name("verify-receipt")
                .about("Check a vote receipt's signature")
                .arg(
                    Arg::with_name("INPUT")
                        .index(1)
                        .required(true)
                        .help("Receipt in JSON format"),
                )
                .arg(
                    Arg::with_name("public-key")
                        .long("public-key")
                        .takes_value(true)
                        .required(true)
                        .help("Deployment public key in hex"),
                ),
        )
        .subcommand(
            SubCommand::with_name("e2e")
                .about("Run an in-process demonstration election")
                .arg(
                    Arg::with_name("voters")
                        .long("voters")
                        .takes_value(true)
                        .help("Number of simulated voters (default 40)"),
                ),
        )
        .get_matches();

    if matches.subcommand_matches("keygen").is_some() {
        command_keygen::command_keygen();
    }
    if let Some(matches) = matches.subcommand_matches("verify-audit") {
        command_audit::command_verify_audit(matches);
    }
    if let Some(matches) = matches.subcommand_matches("merkle-root") {
        command_merkle::command_merkle_root(matches);
    }
    if let Some(matches) = matches.subcommand_matches("verify-receipt") {
        command_receipt::command_verify_receipt(matches);
    }
    if let Some(matches) = matches.subcommand_matches("e2e") {
        command_e2e::command_e2e(matches);
    }
}

/// Expand ~ and environment variables in a path argument
pub fn expand(path: &str) -> String {
    shellexpand::full(path)
        .map(|expanded| expanded.to_string())
        .unwrap_or_else(|_| path.to_string())
}

pub fn read_file(filename: &str, context: &str) -> Vec<u8> {
    match std::fs::read(expand(filename)) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("voteguard {}: unable to read {}: {}", context, filename, e);
            std::process::exit(1);
        }
    }
}
