#![no_main]

use libfuzzer_sys::fuzz_target;
use chartguard_core::types::{Resource, SecurityLevel};
use chartguard_harden::{HardenConfigBuilder, Hardener};
use tokio_util::sync::CancellationToken;

fuzz_target!(|data: &[u8]| {
    let Ok(object) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Some(resource) = Resource::from_object(object) else {
        return;
    };

    let Ok(runtime) = tokio::runtime::Builder::new_current_thread().build() else {
        return;
    };
    let config = HardenConfigBuilder::new()
        .security_level(SecurityLevel::Restricted)
        .build()
        .unwrap();
    let hardener = Hardener::from_config(config).unwrap();
    let cancel = CancellationToken::new();

    let mut resources = vec![resource];
    runtime.block_on(async {
        hardener.harden(&mut resources, &cancel).await.unwrap();
        // 두 번째 실행은 변경이 없어야 함
        let second = hardener.harden(&mut resources, &cancel).await.unwrap();
        assert!(second.changes.is_empty());
    });
});
