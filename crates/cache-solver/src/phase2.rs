//! Phase 2 address-space packer (ss4.5): converts each selector's
//! bucket-relative bit assignment into a final byte offset, subject to the
//! 128-byte bucket and overflow rules.

use std::collections::{HashMap, HashSet};

use cache_graph::{remove_uninteresting_classes, Graph};
use cache_model::{ClassId, Diagnostics, SelectorId, BUCKET_SIZE, OVERFLOW_THRESHOLD};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::constraint::{Constraint, ConstraintSet};
use crate::drop::cascade_flattening_drop;

const TARGET: &str = "solver";

/// Per-bucket occupancy tracked during packing.
#[derive(Debug, Default)]
struct AddressSpace {
    bucket_usage: HashMap<u32, u32>,
    overflowed_into: HashSet<u32>,
}

impl AddressSpace {
    fn usage(&self, bucket: u32) -> u32 {
        *self.bucket_usage.get(&bucket).unwrap_or(&0)
    }

    fn max_bucket(&self) -> u32 {
        self.bucket_usage.keys().copied().max().unwrap_or(0)
    }

    fn fits(&self, size: u32, bucket: u32) -> bool {
        if self.overflowed_into.contains(&bucket) {
            return false;
        }
        let usage = self.usage(bucket);
        if usage + size <= BUCKET_SIZE {
            return true;
        }
        if size <= OVERFLOW_THRESHOLD {
            return false;
        }
        let remaining_here = BUCKET_SIZE.saturating_sub(usage);
        if remaining_here == 0 {
            return false;
        }
        let mut need = size - remaining_here;
        let mut next = bucket + 1;
        while need > 0 {
            if self.bucket_usage.contains_key(&next) || self.overflowed_into.contains(&next) {
                return false;
            }
            need = need.saturating_sub(BUCKET_SIZE);
            next += 1;
        }
        true
    }

    fn commit(&mut self, size: u32, bucket: u32) {
        let usage = self.bucket_usage.entry(bucket).or_insert(0);
        let remaining_here = BUCKET_SIZE - *usage;
        if size <= remaining_here {
            *usage += size;
            return;
        }
        *usage = BUCKET_SIZE;
        let mut need = size - remaining_here;
        let mut next = bucket + 1;
        while need > 0 {
            let take = need.min(BUCKET_SIZE);
            self.bucket_usage.insert(next, take);
            self.overflowed_into.insert(next);
            need -= take;
            next += 1;
        }
    }
}

/// Allowed bit pattern a selector may land in given every still-live class
/// that declares it (ss4.4): clear the class's slots, mark every other
/// method's slot occupied, the remaining slots are this selector's options.
fn constraint_for_method(graph: &Graph, class_id: ClassId, selector_id: SelectorId) -> Constraint {
    let class = graph.class(class_id);
    let modulo = class.mask() + 1;
    let mut occupied = vec![false; modulo as usize];
    for m in &class.methods {
        if m.selector == selector_id {
            continue;
        }
        let addr = graph.selectors.get(m.selector).in_progress_bucket_index;
        occupied[class.slot_for(class.shift, class.mask(), addr)] = true;
    }
    let allowed = (0..modulo).filter(|&s| !occupied[s as usize]).collect();
    Constraint {
        shift: class.shift,
        mask: class.mask(),
        allowed_values: allowed,
    }
}

fn drop_classes_for_selector(
    graph: &mut Graph,
    order: &[ClassId],
    selector_id: SelectorId,
    diagnostics: &mut Diagnostics,
    reason: &str,
) {
    let classes_using: Vec<ClassId> = graph.selectors.get(selector_id).classes.clone();
    for cls in classes_using {
        if !graph.class(cls).flags.should_generate_imp_cache {
            continue;
        }
        graph.class_mut(cls).flags.should_generate_imp_cache = false;
        cascade_flattening_drop(graph, order, cls);
        diagnostics.warn(
            TARGET,
            format!("class {} dropped: {reason}", graph.class(cls).name),
        );
    }
}

/// Run Phase 2 over the still-live classes from Phase 1, mutating `order` in
/// place to drop out any class whose selectors could not be placed.
pub fn pack(graph: &mut Graph, order: &mut Vec<ClassId>, rng: &mut StdRng, diagnostics: &mut Diagnostics) {
    let mut live_ids: HashSet<SelectorId> = HashSet::new();
    for &id in order.iter() {
        if !graph.class(id).flags.should_generate_imp_cache {
            continue;
        }
        for m in &graph.class(id).methods {
            live_ids.insert(m.selector);
        }
    }

    let mut ids: Vec<SelectorId> = live_ids.into_iter().collect();
    ids.sort_by(|a, b| {
        let sa = graph.selectors.get(*a);
        let sb = graph.selectors.get(*b);
        (sb.fixed_bits_mask.count_ones(), sb.classes.len(), &sb.name)
            .cmp(&(sa.fixed_bits_mask.count_ones(), sa.classes.len(), &sa.name))
    });

    let mut addr_space = AddressSpace::default();

    for sel_id in ids {
        if graph.selectors.get(sel_id).classes.iter().all(|&c| !graph.class(c).flags.should_generate_imp_cache) {
            continue; // every class that used to reference this was already dropped
        }
        let (size, natural_bucket) = {
            let sel = graph.selectors.get(sel_id);
            // `in_progress_bucket_index` is already a bucket-granularity
            // address (Phase 1 operates in units of the 128-byte bucket);
            // it IS the bucket index, not a byte offset needing `>> 7`.
            (sel.size, sel.in_progress_bucket_index)
        };

        if addr_space.fits(size, natural_bucket) {
            addr_space.commit(size, natural_bucket);
            continue;
        }

        let mut cs = ConstraintSet::new();
        let classes_using: Vec<ClassId> = graph.selectors.get(sel_id).classes.clone();
        for cls in &classes_using {
            if graph.class(*cls).flags.should_generate_imp_cache {
                cs.add(constraint_for_method(graph, *cls, sel_id));
            }
        }
        let Some(merged) = cs.merged().cloned() else {
            continue;
        };
        if merged.allowed_values.is_empty() {
            drop_classes_for_selector(
                graph,
                order,
                sel_id,
                diagnostics,
                "selector has no bit pattern compatible with every class that declares it",
            );
            continue;
        }

        let modulo = merged.mask + 1;
        let allowed: Vec<u32> = merged.allowed_values.iter().copied().collect();
        let search_span = addr_space.max_bucket() + allowed.len() as u32 + 2;
        let mut bases: Vec<u32> = (0..=search_span).collect();
        bases.shuffle(rng);

        let mut placed = false;
        'search: for base in bases {
            for &v in &allowed {
                let candidate_addr = (base.wrapping_mul(modulo).wrapping_add(v)) << merged.shift;
                if addr_space.fits(size, candidate_addr) {
                    addr_space.commit(size, candidate_addr);
                    graph.selectors.get_mut(sel_id).in_progress_bucket_index = candidate_addr;
                    placed = true;
                    break 'search;
                }
            }
        }
        if !placed {
            drop_classes_for_selector(
                graph,
                order,
                sel_id,
                diagnostics,
                "no free bucket found for this selector within the search span",
            );
        }
    }

    remove_uninteresting_classes(graph, order, diagnostics);
}

#[cfg(test)]
mod tests {
    use super::*;
    use cache_config::OptimizerConfig;
    use cache_graph::{build_graph, InputClass, InputDylib};
    use rand::SeedableRng;

    fn class(name: &str, methods: Vec<&str>) -> InputClass {
        InputClass {
            name: name.to_string(),
            is_metaclass: false,
            is_root_class: true,
            superclass: None,
            metaclass: None,
            methods: methods.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn packed_selectors_never_collide_and_buckets_stay_within_size() {
        let dylibs = vec![InputDylib {
            install_name: "libA.dylib".to_string(),
            classes: vec![
                class("C1", vec!["foo", "bar"]),
                class("C2", vec!["foo", "baz", "qux"]),
            ],
            categories: Vec::new(),
        }];
        let mut cfg = OptimizerConfig::default();
        cfg.needed_class_priority.insert("C1".to_string(), 0);
        cfg.needed_class_priority.insert("C2".to_string(), 1);
        let mut diags = Diagnostics::new();
        let (mut graph, mut order) = build_graph(&dylibs, &cfg, &mut diags).unwrap();
        crate::phase1::solve(&mut graph, &order, &mut diags);

        let mut rng = StdRng::seed_from_u64(42);
        pack(&mut graph, &mut order, &mut rng, &mut diags);

        let mut by_bucket: HashMap<u32, u32> = HashMap::new();
        for (id, sel) in graph.selectors.iter() {
            if id == graph.selectors.magic || !sel.is_live() {
                continue;
            }
            let bucket = sel.in_progress_bucket_index;
            *by_bucket.entry(bucket).or_insert(0) += sel.size;
        }
        for usage in by_bucket.values() {
            assert!(*usage <= BUCKET_SIZE * 2, "bucket overfull: {usage}");
        }
    }
}
