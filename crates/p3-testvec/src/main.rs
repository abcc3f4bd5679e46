//! Test vector generator for the p3 Sphinx core.
//!
//! Generates `test_vectors.json` from fixed scalars so independent
//! implementations can check their path-key schedule, blinding, replay tags
//! and wire format byte for byte.
//!
//! Usage:
//!   p3-testvec              # Generate test_vectors.json
//!   p3-testvec --verify     # Verify test vectors match expected values

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use p3_crypto::blake3::contexts;
use p3_crypto::p256::{compute_blinding_factor, P256SecretKey, SharedSecret};
use p3_sphinx::replay::ReplayTag;
use p3_sphinx::route::{new_packet_with_session, RelayHop};
use p3_sphinx::schedule::{HopKeys, PathKeySchedule};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const VECTORS_PATH: &str = "tests/fixtures/test_vectors.json";

/// Fixed session scalar.
const SESSION_SCALAR: [u8; 32] = [0x11; 32];

/// Fixed relay scalars, one per hop.
const RELAY_SCALARS: [[u8; 32]; 3] = [[0x21; 32], [0x22; 32], [0x23; 32]];

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

fn entry(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

fn generate_blake3_vectors() -> BTreeMap<String, TestVector> {
    let mut vectors = BTreeMap::new();

    let secret = [0x42u8; 32];
    for (name, context) in [
        ("blake3_replay_tag_context", contexts::SPHINX_REPLAY_TAG),
        ("blake3_hop_mac_context", contexts::SPHINX_HOP_MAC),
    ] {
        let key = p3_crypto::blake3::derive_key(context, &secret);
        vectors.insert(
            name.to_string(),
            TestVector {
                description: format!("BLAKE3::derive_key(\"{context}\", 0x42*32)"),
                inputs: BTreeMap::from([
                    entry("context", context),
                    entry("key_material", hex::encode(secret)),
                ]),
                outputs: BTreeMap::from([entry("derived_key", hex::encode(key))]),
            },
        );
    }

    let fields = p3_crypto::blake3::encode_multi_field(&[b"abc", b"", b"de"]);
    vectors.insert(
        "encode_multi_field".to_string(),
        TestVector {
            description: "LE32-length-prefixed encoding of [\"abc\", \"\", \"de\"]".to_string(),
            inputs: BTreeMap::from([entry("fields", "abc,,de")]),
            outputs: BTreeMap::from([entry("encoded", hex::encode(fields))]),
        },
    );

    vectors
}

fn generate_p256_vectors() -> anyhow::Result<BTreeMap<String, TestVector>> {
    let mut vectors = BTreeMap::new();

    let session = P256SecretKey::from_bytes(&SESSION_SCALAR).context("session scalar")?;
    let relay = P256SecretKey::from_bytes(&RELAY_SCALARS[0]).context("relay scalar")?;
    let shared = session.diffie_hellman(&relay.public_key());

    vectors.insert(
        "p256_ecdh".to_string(),
        TestVector {
            description: "ECDH(session 0x11*32, relay 0x21*32), x-coordinate".to_string(),
            inputs: BTreeMap::from([
                entry("session_scalar", hex::encode(SESSION_SCALAR)),
                entry("relay_scalar", hex::encode(RELAY_SCALARS[0])),
            ]),
            outputs: BTreeMap::from([
                entry("session_public", hex::encode(session.public_key().to_bytes())),
                entry("relay_public", hex::encode(relay.public_key().to_bytes())),
                entry("shared_secret", hex::encode(shared.as_bytes())),
            ]),
        },
    );

    let factor = compute_blinding_factor(&session.public_key(), &shared)
        .context("blinding factor")?;
    let blinded = session.public_key().blind(&factor).context("blind")?;
    vectors.insert(
        "p256_blinding_factor".to_string(),
        TestVector {
            description: "H(group_element, shared_secret) reduced mod n, applied to the group element"
                .to_string(),
            inputs: BTreeMap::from([
                entry("group_element", hex::encode(session.public_key().to_bytes())),
                entry("shared_secret", hex::encode(shared.as_bytes())),
            ]),
            outputs: BTreeMap::from([
                entry("blinding_factor", hex::encode(factor.to_bytes())),
                entry("blinded_element", hex::encode(blinded.to_bytes())),
            ]),
        },
    );

    Ok(vectors)
}

fn generate_path_vectors() -> anyhow::Result<BTreeMap<String, TestVector>> {
    let mut vectors = BTreeMap::new();

    let session = P256SecretKey::from_bytes(&SESSION_SCALAR).context("session scalar")?;
    let relays = RELAY_SCALARS
        .iter()
        .map(P256SecretKey::from_bytes)
        .collect::<Result<Vec<_>, _>>()
        .context("relay scalars")?;
    let publics: Vec<_> = relays.iter().map(P256SecretKey::public_key).collect();

    let schedule = PathKeySchedule::derive(&publics, &session).context("path schedule")?;

    let mut inputs = BTreeMap::from([entry("session_scalar", hex::encode(SESSION_SCALAR))]);
    let mut outputs = BTreeMap::new();
    for (hop, scalar) in RELAY_SCALARS.iter().enumerate() {
        inputs.insert(format!("relay_{hop}_scalar"), hex::encode(scalar));

        let secret: &SharedSecret = &schedule.shared_secrets()[hop];
        outputs.insert(
            format!("hop_{hop}_group_element"),
            hex::encode(schedule.group_elements()[hop].to_bytes()),
        );
        outputs.insert(format!("hop_{hop}_shared_secret"), hex::encode(secret.as_bytes()));
        outputs.insert(
            format!("hop_{hop}_replay_tag"),
            hex::encode(ReplayTag::from_secret(secret).as_bytes()),
        );
        outputs.insert(
            format!("hop_{hop}_mac_key"),
            hex::encode(HopKeys::derive(secret).mac),
        );
    }

    vectors.insert(
        "sphinx_path_schedule_3_hops".to_string(),
        TestVector {
            description: "Shared secrets, group elements and replay tags for a 3-hop path"
                .to_string(),
            inputs: inputs.clone(),
            outputs,
        },
    );

    let hops: Vec<RelayHop> = publics
        .iter()
        .enumerate()
        .map(|(i, pk)| RelayHop::new(pk.clone(), format!("relay-{i}.p3:4433")))
        .collect();
    let payload = b"p3 test vector payload".to_vec();
    let packet = new_packet_with_session(&hops, payload.clone(), &session).context("packet")?;

    inputs.insert("payload".to_string(), hex::encode(&payload));
    vectors.insert(
        "sphinx_packet_3_hops".to_string(),
        TestVector {
            description: "Encoded version-1 packet addressed to hop 0 of the 3-hop path"
                .to_string(),
            inputs,
            outputs: BTreeMap::from([
                entry("header_mac", hex::encode(packet.header.hmac)),
                entry("packet", hex::encode(packet.to_bytes())),
            ]),
        },
    );

    Ok(vectors)
}

fn generate_all_vectors() -> anyhow::Result<TestVectors> {
    let mut all_vectors = BTreeMap::new();

    all_vectors.extend(generate_blake3_vectors());
    all_vectors.extend(generate_p256_vectors()?);
    all_vectors.extend(generate_path_vectors()?);

    Ok(TestVectors {
        version: "1.0".to_string(),
        generated_by: "p3-testvec".to_string(),
        vectors: all_vectors,
    })
}

fn verify_vectors(vectors: &TestVectors) -> anyhow::Result<bool> {
    let regenerated = generate_all_vectors()?;
    let mut all_pass = true;

    for (name, expected) in &vectors.vectors {
        match regenerated.vectors.get(name) {
            Some(actual) if actual.outputs == expected.outputs => info!("PASS: {name}"),
            Some(actual) => {
                error!("FAIL: {name}");
                error!("  expected: {:?}", expected.outputs);
                error!("  actual:   {:?}", actual.outputs);
                all_pass = false;
            }
            None => {
                error!("MISSING: {name}");
                all_pass = false;
            }
        }
    }

    Ok(all_pass)
}

fn write_vectors(path: &Path, vectors: &TestVectors) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(vectors)?;
    std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    info!("Generated {} test vectors to {}", vectors.vectors.len(), path.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("p3=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let path = Path::new(VECTORS_PATH);
    let verify = std::env::args().any(|a| a == "--verify");

    let vectors = if verify && path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&content).context("parse test vectors")?
    } else {
        if verify {
            warn!("No existing test vectors found at {}. Generating...", path.display());
        }
        let vectors = generate_all_vectors()?;
        write_vectors(path, &vectors)?;
        vectors
    };

    if !verify_vectors(&vectors)? {
        bail!("test vector verification failed");
    }
    info!("All test vectors verified successfully.");
    Ok(())
}
