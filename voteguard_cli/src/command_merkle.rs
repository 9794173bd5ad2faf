use std::str::FromStr;
use voteguard::{build_root, gen_proof, verify_inclusion, Hash32};

pub fn command_merkle_root(matches: &clap::ArgMatches) {
    let filename = matches.value_of("INPUT").unwrap();
    let file_bytes = crate::read_file(filename, "merkle-root");

    let hex_leaves: Vec<String> = match serde_json::from_slice(&file_bytes) {
        Ok(leaves) => leaves,
        Err(e) => {
            eprintln!("voteguard merkle-root: unable to parse {}: {}", filename, e);
            std::process::exit(1);
        }
    };

    let mut leaves = Vec::with_capacity(hex_leaves.len());
    for (i, hex_leaf) in hex_leaves.iter().enumerate() {
        match Hash32::from_str(hex_leaf) {
            Ok(leaf) => leaves.push(leaf),
            Err(e) => {
                eprintln!("voteguard merkle-root: bad leaf at index {}: {}", i, e);
                std::process::exit(1);
            }
        }
    }

    let root = match build_root(&leaves) {
        Some(root) => root,
        None => {
            eprintln!("voteguard merkle-root: no leaves, no root");
            std::process::exit(1);
        }
    };

    println!("root:       {}", root);
    println!("leaf-count: {}", leaves.len());

    if let Some(index) = matches.value_of("prove") {
        let index: usize = match index.parse() {
            Ok(index) => index,
            Err(_) => {
                eprintln!("voteguard merkle-root: --prove takes a leaf index");
                std::process::exit(1);
            }
        };
        let proof = match gen_proof(&leaves, index) {
            Some(proof) => proof,
            None => {
                eprintln!("voteguard merkle-root: leaf index {} out of range", index);
                std::process::exit(1);
            }
        };
        if !verify_inclusion(&leaves[index], &proof, &root) {
            eprintln!("voteguard merkle-root: generated proof failed to verify");
            std::process::exit(1);
        }
        println!("proof:      {}", serde_json::to_string(&proof).unwrap());
    }
}
