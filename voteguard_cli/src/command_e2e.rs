use uuid::Uuid;
use voteguard::*;

/// Runs the whole protocol in-process: challenges, attestations, votes, a
/// double-vote attempt, a tampered submission, anchoring, analytics, and a
/// final audit-chain verification.
pub fn command_e2e(matches: &clap::ArgMatches) {
    let num_voters: usize = match matches.value_of("voters").unwrap_or("40").parse() {
        Ok(n) => n,
        Err(_) => {
            eprintln!("voteguard e2e: --voters takes a number");
            std::process::exit(1);
        }
    };

    let (secret, public) = generate_keypair();
    let engine = VoteGuard::new(
        VoteGuardConfig::default(),
        secret,
        [7; 32],
        MemLedger::new(),
    );
    let ballot_id = Uuid::new_v4();
    let bucket = time_bucket(now());
    println!("> Ballot {}", ballot_id);

    let genders = ["f", "m"];
    let ages = ["18-24", "25-34", "35-44", "45-54"];
    let mut last_receipt = None;
    for n in 0..num_voters {
        let mut demographics = Demographics::new();
        demographics.insert("gender".to_string(), genders[n % 2].to_string());
        demographics.insert("age".to_string(), ages[n % 4].to_string());
        let context = VerifiedContext {
            subject: format!("voter-{}", n),
            demographics,
        };
        let option_id = if n % 3 == 0 { "opt-B" } else { "opt-A" };

        let (nonce, _) = engine.request_nonce().unwrap();
        let attestation = engine
            .issue_attestation(ballot_id, option_id, bucket, nonce, &context)
            .unwrap();
        let receipt = engine
            .submit_vote(ballot_id, option_id, bucket, &attestation)
            .unwrap();
        last_receipt = Some((receipt, context));
    }
    println!("> {} votes accepted", num_voters);

    // A double-vote attempt from the last voter
    if let Some((_, context)) = &last_receipt {
        let (nonce, _) = engine.request_nonce().unwrap();
        let attestation = engine
            .issue_attestation(ballot_id, "opt-A", bucket, nonce, context)
            .unwrap();
        match engine.submit_vote(ballot_id, "opt-A", bucket, &attestation) {
            Err(Error::DuplicateNullifier(_)) => println!("> Double vote rejected"),
            _ => {
                eprintln!("voteguard e2e: double vote was not rejected");
                std::process::exit(1);
            }
        }
    }

    // A tampered submission: attestation for opt-A presented with opt-B
    {
        let context = VerifiedContext {
            subject: "tamperer".to_string(),
            demographics: Demographics::new(),
        };
        let (nonce, _) = engine.request_nonce().unwrap();
        let attestation = engine
            .issue_attestation(ballot_id, "opt-A", bucket, nonce, &context)
            .unwrap();
        match engine.submit_vote(ballot_id, "opt-B", bucket, &attestation) {
            Err(Error::AttestationInvalid) => println!("> Tampered submission rejected"),
            _ => {
                eprintln!("voteguard e2e: tamper was not rejected");
                std::process::exit(1);
            }
        }
    }

    let root = engine.merkle_root(&ballot_id).unwrap().unwrap();
    println!("> Merkle root {} over {} leaves", root.root, root.leaf_count);

    if let Some((receipt, _)) = &last_receipt {
        let check = engine.verify_receipt(receipt).unwrap();
        println!(
            "> Receipt check: valid={} signature_valid={} (deployment key {})",
            check.valid,
            check.signature_valid,
            hex::encode(public.as_bytes())
        );
    }

    let sink = MemAnchorSink::new();
    let anchor = engine.anchor_root(&ballot_id, &sink).unwrap();
    println!("> Root anchored as {}", anchor.external_ref);

    let dims = vec!["gender".to_string(), "age".to_string()];
    let view = engine.query_results(&ballot_id, &dims).unwrap();
    println!("> Results: {}", serde_json::to_string_pretty(&view).unwrap());

    let summary = engine.security_event_summary().unwrap();
    println!(
        "> Security events: {}",
        serde_json::to_string(&summary).unwrap()
    );

    let report = engine.verify_audit_chain().unwrap();
    println!(
        "> Audit chain: ok={} violations={}",
        report.ok, report.violations
    );
    if !report.ok {
        std::process::exit(1);
    }
}
