use proptest::prelude::*;
use serde_json::{Value, json};

use procpipes::context::{EncoderOptions, ExecutionContext, ScalarValue, decode_env, encode};
use procpipes::types::AssetKey;

fn scalar_strategy() -> impl Strategy<Value = ScalarValue> {
    prop_oneof![
        any::<bool>().prop_map(ScalarValue::Bool),
        any::<i64>().prop_map(ScalarValue::Int),
        (-1.0e12f64..1.0e12).prop_map(ScalarValue::Float),
        "\\PC{0,16}".prop_map(ScalarValue::String),
    ]
}

fn extra_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "\\PC{0,12}".prop_map(Value::from),
        proptest::collection::vec(any::<i32>(), 0..4).prop_map(|v| json!(v)),
    ]
}

fn context_strategy() -> impl Strategy<Value = ExecutionContext> {
    (
        "[a-z0-9-]{1,24}",
        proptest::collection::vec(proptest::collection::vec("[a-z_/]{1,8}", 1..4), 0..4),
        proptest::collection::vec(("[a-z_]{1,8}", "[a-z_]{1,8}"), 0..3),
        proptest::collection::btree_map("[a-z_]{1,8}", scalar_strategy(), 0..5),
        proptest::collection::btree_map("[a-z_]{1,8}", "\\PC{0,16}", 0..3),
        proptest::collection::btree_map("[a-z_]{1,8}", extra_strategy(), 0..3),
    )
        .prop_map(|(run_id, assets, checks, config, provenance, extras)| {
            let mut builder = ExecutionContext::builder(run_id);
            for segments in assets {
                builder = builder.asset(AssetKey::new(segments));
            }
            for (asset, name) in checks {
                builder = builder.check(AssetKey::new([asset]), name);
            }
            for (key, value) in config {
                builder = builder.config(key, value);
            }
            for (key, value) in provenance {
                builder = builder.provenance(key, value);
            }
            for (key, value) in extras {
                builder = builder.extra(key, value);
            }
            builder.build().expect("generated context is valid")
        })
}

proptest! {
    #[test]
    fn decode_inverts_encode(ctx in context_strategy()) {
        let encoded = encode(&ctx, &EncoderOptions::default()).expect("encodes");
        prop_assert!(!encoded.is_split());
        prop_assert_eq!(decode_env(encoded.iter()).expect("decodes"), ctx);
    }

    #[test]
    fn decode_inverts_split_encode(ctx in context_strategy(), chunk in 4usize..64) {
        let options = EncoderOptions {
            max_value_bytes: chunk,
            max_total_bytes: 1024 * 1024,
            split: true,
        };
        let encoded = encode(&ctx, &options).expect("encodes");
        prop_assert_eq!(decode_env(encoded.iter()).expect("decodes"), ctx);
    }
}
