mod common;
use crate::common::builders::sample_context;
use crate::common::init_tracing;

use std::error::Error;

use serde_json::json;

use procpipes::context::{
    CONTEXT_CHUNKS_ENV_VAR, CONTEXT_ENV_VAR, ContextFileMode, EncoderOptions, ExecutionContext,
    MESSAGES_ENV_VAR, MessagesParams, decode_env, decode_messages_env, encode, prepare,
};
use procpipes::context::encoder::{decode_payload, encode_payload};
use procpipes::errors::ContextError;
use procpipes::protocol::MARKER;
use procpipes::types::{AssetKey, TargetId};

type TestResult = Result<(), Box<dyn Error>>;

fn large_context(extra_bytes: usize) -> ExecutionContext {
    // Pseudo-random text so zlib cannot shrink it away.
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    let noise: String = (0..extra_bytes)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            char::from(b'a' + (state % 26) as u8)
        })
        .collect();

    ExecutionContext::builder("run-large")
        .asset("big")
        .extra("blob", json!(noise))
        .build()
        .expect("valid context")
}

#[test]
fn encode_produces_context_and_messages_variables() -> TestResult {
    init_tracing();

    let ctx = sample_context("run-1");
    let encoded = encode(&ctx, &EncoderOptions::default())?;

    assert!(encoded.get(CONTEXT_ENV_VAR).is_some());
    assert!(encoded.get(MESSAGES_ENV_VAR).is_some());
    assert!(!encoded.is_split());

    let decoded = decode_env(encoded.iter())?;
    assert_eq!(decoded, ctx);

    let messages = decode_messages_env(encoded.iter())?;
    assert_eq!(messages.stdio, "stdout");
    assert_eq!(messages.marker, MARKER);
    Ok(())
}

#[test]
fn payload_is_base64_zlib_json_with_data_wrapper() -> TestResult {
    let ctx = sample_context("run-wire");
    let encoded = encode(&ctx, &EncoderOptions::default())?;
    let payload = encoded.get(CONTEXT_ENV_VAR).ok_or("missing context var")?;

    let raw: serde_json::Value = decode_payload(payload)?;
    assert_eq!(raw["data"]["run_id"], "run-wire");
    assert_eq!(raw["data"]["asset_keys"], json!([["materialize_subprocess"]]));
    assert_eq!(
        raw["data"]["checks"],
        json!([{"asset_key": ["materialize_subprocess"], "check_name": "check_subprocess"}])
    );
    assert_eq!(raw["data"]["config"]["limit"], 10);
    assert_eq!(raw["data"]["provenance"]["code_version"], "v1");
    Ok(())
}

#[test]
fn messages_payload_round_trips() -> TestResult {
    let payload = encode_payload(&MessagesParams::default())?;
    let decoded: MessagesParams = decode_payload(&payload)?;
    assert_eq!(decoded, MessagesParams::default());
    Ok(())
}

#[test]
fn oversized_context_is_split_and_reassembled() -> TestResult {
    let ctx = large_context(20_000);
    let options = EncoderOptions {
        max_value_bytes: 1024,
        max_total_bytes: 1024 * 1024,
        split: true,
    };

    let encoded = encode(&ctx, &options)?;
    assert!(encoded.is_split());
    assert!(encoded.get(CONTEXT_ENV_VAR).is_none());

    let chunks: usize = encoded.get(CONTEXT_CHUNKS_ENV_VAR).ok_or("no chunk count")?.parse()?;
    assert!(chunks > 1);
    for i in 0..chunks {
        let chunk = encoded
            .get(&format!("{CONTEXT_ENV_VAR}_{i}"))
            .ok_or("missing chunk")?;
        assert!(chunk.len() <= options.max_value_bytes);
    }

    // Order of variables must not matter to the decoder.
    let mut shuffled: Vec<(String, String)> = encoded.clone().into_iter().collect();
    shuffled.reverse();
    assert_eq!(decode_env(shuffled)?, ctx);
    Ok(())
}

#[test]
fn oversized_context_without_splitting_is_rejected() {
    let ctx = large_context(20_000);
    let options = EncoderOptions {
        max_value_bytes: 1024,
        max_total_bytes: 1024 * 1024,
        split: false,
    };

    match encode(&ctx, &options) {
        Err(ContextError::TooLarge {
            variable,
            size,
            limit,
        }) => {
            assert_eq!(variable, CONTEXT_ENV_VAR);
            assert_eq!(limit, 1024);
            assert!(size > limit);
        }
        other => panic!("expected TooLarge, got {other:?}"),
    }
}

#[test]
fn context_over_total_limit_is_rejected_even_with_splitting() {
    let ctx = large_context(20_000);
    let options = EncoderOptions {
        max_value_bytes: 512,
        max_total_bytes: 2048,
        split: true,
    };

    assert!(matches!(
        encode(&ctx, &options),
        Err(ContextError::TooLarge { limit: 2048, .. })
    ));
}

#[test]
fn decode_reports_missing_and_corrupt_payloads() {
    let empty: Vec<(String, String)> = Vec::new();
    assert!(matches!(decode_env(empty), Err(ContextError::Decode { .. })));

    let corrupt = vec![(CONTEXT_ENV_VAR, "not base64 at all!")];
    assert!(matches!(decode_env(corrupt), Err(ContextError::Decode { .. })));

    let missing_chunk = vec![
        (CONTEXT_CHUNKS_ENV_VAR, "2"),
        ("PIPES_CONTEXT_0", "eJw="),
    ];
    match decode_env(missing_chunk) {
        Err(ContextError::Decode { reason }) => assert!(reason.contains("PIPES_CONTEXT_1")),
        other => panic!("expected Decode error, got {other:?}"),
    }
}

#[test]
fn builder_rejects_empty_run_id_and_non_finite_floats() {
    assert!(matches!(
        ExecutionContext::builder("  ").asset("a").build(),
        Err(ContextError::InvalidValue { ref key, .. }) if key == "run_id"
    ));

    assert!(matches!(
        ExecutionContext::builder("run").config("ratio", f64::NAN).build(),
        Err(ContextError::InvalidValue { ref key, .. }) if key == "ratio"
    ));
}

#[test]
fn declared_targets_follow_context_identities() -> TestResult {
    let ctx = ExecutionContext::builder("run")
        .asset(AssetKey::new(["warehouse", "orders"]))
        .check("warehouse/orders", "non_empty")
        .build()?;

    let declared = ctx.declared_targets();
    assert_eq!(declared.len(), 2);
    assert!(declared.contains(&TargetId::asset("warehouse/orders")));
    assert!(declared.contains(&TargetId::check("warehouse/orders", "non_empty")));
    Ok(())
}

#[test]
fn context_file_round_trips_and_is_removed_on_drop() -> TestResult {
    init_tracing();

    let ctx = sample_context("run-file");
    let prepared = prepare(&ctx, &EncoderOptions::default(), ContextFileMode::Always)?;

    let path = prepared.file_path().ok_or("no context file")?.to_path_buf();
    assert!(path.exists());

    // The file holds the bare context; the variable only points at it.
    let on_disk: ExecutionContext = serde_json::from_slice(&std::fs::read(&path)?)?;
    assert_eq!(on_disk, ctx);
    let params: serde_json::Value =
        decode_payload(prepared.encoded().get(CONTEXT_ENV_VAR).ok_or("no context var")?)?;
    assert_eq!(params, json!({ "path": path }));
    assert!(prepared.encoded().get(MESSAGES_ENV_VAR).is_some());

    assert_eq!(decode_env(prepared.encoded().iter())?, ctx);

    drop(prepared);
    assert!(!path.exists());
    Ok(())
}

#[test]
fn context_file_replaces_an_oversized_environment_in_fallback_mode() -> TestResult {
    let ctx = large_context(20_000);
    let options = EncoderOptions {
        max_value_bytes: 1024,
        max_total_bytes: 1024 * 1024,
        split: false,
    };

    assert!(matches!(
        prepare(&ctx, &options, ContextFileMode::Never),
        Err(ContextError::TooLarge { .. })
    ));

    let prepared = prepare(&ctx, &options, ContextFileMode::Fallback)?;
    assert!(prepared.file_path().is_some());
    assert!(!prepared.encoded().is_split());
    assert_eq!(decode_env(prepared.encoded().iter())?, ctx);

    // Small contexts stay in the environment.
    let small = prepare(&sample_context("run-small"), &options, ContextFileMode::Fallback)?;
    assert!(small.file_path().is_none());
    Ok(())
}

#[test]
fn missing_context_file_is_a_decode_error() -> TestResult {
    let dir = tempfile::tempdir()?;
    let gone = dir.path().join("context.json");
    let payload = encode_payload(&json!({ "path": gone }))?;

    match decode_env(vec![(CONTEXT_ENV_VAR, payload)]) {
        Err(ContextError::Decode { reason }) => assert!(reason.contains("context.json")),
        other => panic!("expected Decode error, got {other:?}"),
    }
    Ok(())
}
