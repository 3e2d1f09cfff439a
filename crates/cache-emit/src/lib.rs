//! Per-class cache emission (ss4.7): turns each still-live class's solved
//! `(shift, mask)` and its methods' final selector offsets into the output
//! `ImpCache` record a dynamic loader would consult at process startup.

use std::collections::HashMap;

use cache_graph::Graph;
use cache_model::{ClassId, ClassLocator, Diagnostics, MAX_CACHE_MASK};
use serde::Serialize;

const TARGET: &str = "emit";

#[derive(Debug, Clone, Serialize)]
pub struct BucketEntry {
    pub sel_offset: u32,
    pub install_name: String,
    pub class_name: String,
    pub method_name: String,
    pub is_instance_method: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FallbackClass {
    pub install_name: String,
    pub class_name: String,
    pub is_metaclass: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImpCache {
    pub cache_shift: u32,
    pub cache_mask: u32,
    pub occupied: u32,
    pub has_inlines: bool,
    pub bit_one: u8,
    pub buckets: Vec<Option<BucketEntry>>,
    pub fallback_class: Option<FallbackClass>,
}

/// Emit an `ImpCache` for every class that survived both solver phases.
/// A class whose mask exceeds the 11-bit `cache_mask` field is dropped here
/// with a warning rather than earlier, since the limit is an emission-time
/// encoding constraint rather than a placement constraint (ss4.7, ss7).
pub fn emit_all(
    graph: &Graph,
    order: &[ClassId],
    diagnostics: &mut Diagnostics,
) -> HashMap<ClassLocator, ImpCache> {
    let mut out = HashMap::new();

    for &id in order {
        let class = graph.class(id);
        if !class.flags.should_generate_imp_cache {
            continue;
        }
        let mask = class.mask();
        if mask > MAX_CACHE_MASK {
            diagnostics.warn(
                TARGET,
                format!(
                    "class {} dropped: cache mask {mask:#x} exceeds the 0x7FF bucket limit",
                    class.name
                ),
            );
            continue;
        }

        let mut buckets: Vec<Option<BucketEntry>> = vec![None; mask as usize + 1];
        let mut collided = false;
        for m in &class.methods {
            let sel = graph.selectors.get(m.selector);
            let slot = class.slot_for(class.shift, mask, sel.in_progress_bucket_index);
            if buckets[slot].is_some() {
                collided = true;
                break;
            }
            buckets[slot] = Some(BucketEntry {
                sel_offset: sel.offset.unwrap_or(0),
                install_name: class.install_name.to_string(),
                class_name: class.name.to_string(),
                method_name: m.name.to_string(),
                is_instance_method: !class.is_metaclass,
            });
        }
        if collided {
            diagnostics.warn(
                TARGET,
                format!(
                    "class {} dropped: slot collision detected at emission (solver postcondition violated)",
                    class.name
                ),
            );
            continue;
        }

        let fallback_class = class.flattening_root_superclass.as_ref().map(|loc| FallbackClass {
            install_name: loc.install_name.to_string(),
            class_name: loc.class_name.to_string(),
            is_metaclass: loc.is_metaclass,
        });
        let has_inlines = class
            .methods
            .iter()
            .any(|m| m.provenance.was_inlined && !m.provenance.from_flattening);

        out.insert(
            class.locator(),
            ImpCache {
                cache_shift: class.shift + 7,
                cache_mask: mask,
                occupied: class.methods.len() as u32,
                has_inlines,
                bit_one: 1,
                buckets,
                fallback_class,
            },
        );
    }

    out
}
