//! Test vector generator for this overlay's cryptographic primitives.
//!
//! Generates `tests/fixtures/test_vectors.json`, the ground truth for
//! cross-implementation interoperability of the identity and session
//! crypto suite (ECDSA-P256/SHA-1 signing, node-ID wire encoding, AES-OFB
//! session keystream).
//!
//! Usage:
//!   ochra-testvec              # generate tests/fixtures/test_vectors.json
//!   ochra-testvec --verify     # verify the file matches freshly generated values

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ochra_crypto::aes_ofb;
use ochra_crypto::identity::PrivateKey;
use ochra_types::identity::NodeId;

#[derive(Serialize, Deserialize)]
struct TestVectors {
    version: String,
    generated_by: String,
    vectors: BTreeMap<String, TestVector>,
}

#[derive(Serialize, Deserialize)]
struct TestVector {
    description: String,
    inputs: BTreeMap<String, String>,
    outputs: BTreeMap<String, String>,
}

fn generate_identity_vectors() -> BTreeMap<String, TestVector> {
    let mut vectors = BTreeMap::new();

    let d = [0x01u8; 32];
    let key = PrivateKey::from_bytes(&d).expect("valid scalar");

    vectors.insert(
        "ecdsa_p256_public_key".to_string(),
        TestVector {
            description: "public key (x, y) derived from private scalar 0x01*32".to_string(),
            inputs: BTreeMap::from([("d".to_string(), hex::encode(d))]),
            outputs: BTreeMap::from([
                ("x".to_string(), hex::encode(key.public_key().x())),
                ("y".to_string(), hex::encode(key.public_key().y())),
            ]),
        },
    );

    vectors.insert(
        "sha1_public_key_digest".to_string(),
        TestVector {
            description: "node digest = SHA-1(x || y) of the above public key".to_string(),
            inputs: BTreeMap::from([
                ("x".to_string(), hex::encode(key.public_key().x())),
                ("y".to_string(), hex::encode(key.public_key().y())),
            ]),
            outputs: BTreeMap::from([(
                "digest".to_string(),
                hex::encode(key.public_key().digest()),
            )]),
        },
    );

    let message = b"ochra-testvec sign/verify fixture";
    let sig = key.sign(message).expect("sign");
    vectors.insert(
        "ecdsa_sign_prehash".to_string(),
        TestVector {
            description:
                "sign(d=0x01*32, message) with SHA-1 prehash, deterministic per RFC 6979"
                    .to_string(),
            inputs: BTreeMap::from([
                ("d".to_string(), hex::encode(d)),
                ("message".to_string(), hex::encode(message)),
            ]),
            outputs: BTreeMap::from([
                ("r".to_string(), hex::encode(sig.r)),
                ("s".to_string(), hex::encode(sig.s)),
            ]),
        },
    );

    vectors
}

fn generate_node_id_vectors() -> BTreeMap<String, TestVector> {
    let mut vectors = BTreeMap::new();

    let namespace = [0xAAu8, 0xBB, 0xCC, 0xDD];
    let digest = {
        let mut d = [0u8; 20];
        for (i, byte) in d.iter_mut().enumerate() {
            *byte = i as u8;
        }
        d
    };
    let id = NodeId::new(namespace, digest);
    let bytes = id.to_bytes();

    vectors.insert(
        "node_id_wire_encoding".to_string(),
        TestVector {
            description: "0x90 || namespace || digest wire encoding".to_string(),
            inputs: BTreeMap::from([
                ("namespace".to_string(), hex::encode(namespace)),
                ("digest".to_string(), hex::encode(digest)),
            ]),
            outputs: BTreeMap::from([
                ("wire_bytes".to_string(), hex::encode(&bytes)),
                ("base58".to_string(), id.to_base58()),
            ]),
        },
    );

    let other = NodeId::new(namespace, [0xFFu8; 20]);
    vectors.insert(
        "node_id_xor_distance".to_string(),
        TestVector {
            description: "xor_distance between two node IDs in the same namespace".to_string(),
            inputs: BTreeMap::from([
                ("digest_a".to_string(), hex::encode(digest)),
                ("digest_b".to_string(), hex::encode([0xFFu8; 20])),
            ]),
            outputs: BTreeMap::from([(
                "distance".to_string(),
                hex::encode(id.xor_distance(&other)),
            )]),
        },
    );

    vectors
}

fn generate_session_cipher_vectors() -> BTreeMap<String, TestVector> {
    let mut vectors = BTreeMap::new();

    let key = [0x42u8; 32];
    let plaintext = b"The quick brown fox jumps over the lazy dog";
    let ciphertext = aes_ofb::apply_keystream(&key, plaintext).expect("apply keystream");

    vectors.insert(
        "aes_ofb_session_keystream".to_string(),
        TestVector {
            description: "AES-256-OFB, zero IV, key 0x42*32 applied to a fixed plaintext"
                .to_string(),
            inputs: BTreeMap::from([
                ("key".to_string(), hex::encode(key)),
                ("plaintext".to_string(), hex::encode(plaintext)),
            ]),
            outputs: BTreeMap::from([("ciphertext".to_string(), hex::encode(&ciphertext))]),
        },
    );

    vectors
}

fn generate_all_vectors() -> TestVectors {
    let mut all_vectors = BTreeMap::new();

    all_vectors.extend(generate_identity_vectors());
    all_vectors.extend(generate_node_id_vectors());
    all_vectors.extend(generate_session_cipher_vectors());

    TestVectors {
        version: "1.0".to_string(),
        generated_by: "ochra-testvec".to_string(),
        vectors: all_vectors,
    }
}

fn verify_vectors(vectors: &TestVectors) -> bool {
    let regenerated = generate_all_vectors();
    let mut all_pass = true;

    for (name, expected) in &vectors.vectors {
        if let Some(actual) = regenerated.vectors.get(name) {
            if actual.outputs != expected.outputs {
                eprintln!("FAIL: {name}");
                eprintln!("  expected: {:?}", expected.outputs);
                eprintln!("  actual:   {:?}", actual.outputs);
                all_pass = false;
            } else {
                eprintln!("PASS: {name}");
            }
        } else {
            eprintln!("MISSING: {name}");
            all_pass = false;
        }
    }

    all_pass
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let path = "tests/fixtures/test_vectors.json";

    if args.iter().any(|a| a == "--verify") {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let vectors: TestVectors = serde_json::from_str(&content).expect("valid JSON");
                if verify_vectors(&vectors) {
                    eprintln!("All test vectors verified successfully.");
                    std::process::exit(0);
                } else {
                    eprintln!("Test vector verification FAILED.");
                    std::process::exit(1);
                }
            }
            Err(_) => {
                eprintln!("No existing test vectors found at {path}. Generating...");
                write_and_self_check(path);
            }
        }
    } else {
        write_and_self_check(path);
    }
}

fn write_and_self_check(path: &str) {
    let vectors = generate_all_vectors();
    let json = serde_json::to_string_pretty(&vectors).expect("serialize");

    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent).expect("create dirs");
    }
    std::fs::write(path, &json).expect("write file");
    eprintln!("Generated {} test vectors to {path}", vectors.vectors.len());

    if verify_vectors(&vectors) {
        eprintln!("Self-verification passed.");
    } else {
        eprintln!("Self-verification FAILED.");
        std::process::exit(1);
    }
}
