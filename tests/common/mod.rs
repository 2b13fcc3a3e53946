#![allow(dead_code, unused_imports)]

pub use procpipes_test_utils::builders;
pub use procpipes_test_utils::{init_tracing, with_timeout};

use procpipes::types::{AssetKey, CheckKey, TargetId};

use self::builders::{ASSET, CHECK};

pub fn asset_key() -> AssetKey {
    AssetKey::parse(ASSET)
}

pub fn check_key() -> CheckKey {
    CheckKey::new(ASSET, CHECK)
}

pub fn asset_target() -> TargetId {
    TargetId::asset(ASSET)
}

pub fn check_target() -> TargetId {
    TargetId::check(ASSET, CHECK)
}
