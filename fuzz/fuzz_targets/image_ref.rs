#![no_main]

use libfuzzer_sys::fuzz_target;
use chartguard_harden::image::{explicit_tag, is_digest_pinned, strip_digest};
use chartguard_harden::{parse_image_ref, pin_to_digest};

fuzz_target!(|data: &[u8]| {
    let Ok(image) = std::str::from_utf8(data) else {
        return;
    };

    let _ = parse_image_ref(image);
    let _ = explicit_tag(image);

    // 고정 결과는 항상 다이제스트로 끝나야 함
    let pinned = pin_to_digest(strip_digest(image), "sha256:0000");
    assert!(is_digest_pinned(&pinned));
    assert!(pinned.ends_with("@sha256:0000"));
});
