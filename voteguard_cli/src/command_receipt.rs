use ed25519_dalek::PublicKey;
use voteguard::VoteReceipt;

pub fn command_verify_receipt(matches: &clap::ArgMatches) {
    let filename = matches.value_of("INPUT").unwrap();
    let file_bytes = crate::read_file(filename, "verify-receipt");

    let receipt: VoteReceipt = match serde_json::from_slice(&file_bytes) {
        Ok(receipt) => receipt,
        Err(e) => {
            eprintln!(
                "voteguard verify-receipt: unable to parse {}: {}",
                filename, e
            );
            std::process::exit(1);
        }
    };

    let public_key_hex = matches.value_of("public-key").unwrap();
    let public_key_bytes = match hex::decode(public_key_hex) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("voteguard verify-receipt: bad public key hex: {}", e);
            std::process::exit(1);
        }
    };
    let public = match PublicKey::from_bytes(&public_key_bytes) {
        Ok(public) => public,
        Err(e) => {
            eprintln!("voteguard verify-receipt: bad public key: {}", e);
            std::process::exit(1);
        }
    };

    if receipt.verify_signature(&public) {
        println!("> Receipt signature OK");
        println!("ballot:     {}", receipt.ballot_id);
        println!("leaf:       {}", receipt.leaf_hash);
        println!("leaf-index: {}", receipt.leaf_index);
        println!("root:       {}", receipt.root);
    } else {
        println!("> Receipt signature INVALID");
        std::process::exit(1);
    }
}
