#![no_main]

use libfuzzer_sys::fuzz_target;
use object_wire::core::security::CapabilityContext;
use object_wire::core::types::TypeRegistry;
use object_wire::WireReader;
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    // Fuzz the reader with every category granted; errors are fine, panics are not
    let registry = Arc::new(TypeRegistry::with_builtins());
    let Ok(mut reader) = WireReader::with_defaults(data, registry) else {
        return;
    };
    let ctx = CapabilityContext::trusted();
    while !reader.is_closed() {
        let _ = reader.read_value(&ctx);
    }
});
