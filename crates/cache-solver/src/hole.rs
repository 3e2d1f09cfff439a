//! Low-bit assignment and hole extraction (ss4.6): walks buckets in address
//! order, assigns each live selector its final byte offset, and records the
//! gaps left behind for later non-participating-selector insertion.

use std::collections::BTreeMap;

use cache_graph::Graph;
use cache_model::ClassId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hole {
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Default)]
pub struct HoleMap {
    holes: Vec<Hole>,
    pub end_address: u64,
}

impl HoleMap {
    /// Allocate `size` bytes from the first hole that fits, or grow the
    /// watermark if none does.
    pub fn add_string_of_size(&mut self, size: u64) -> u64 {
        if let Some(idx) = self.holes.iter().position(|h| h.end - h.start >= size) {
            let hole = self.holes[idx];
            let offset = hole.start;
            if hole.end - hole.start == size {
                self.holes.remove(idx);
            } else {
                self.holes[idx].start += size;
            }
            return offset;
        }
        let offset = self.end_address;
        self.end_address += size;
        offset
    }

    pub fn holes(&self) -> &[Hole] {
        &self.holes
    }
}

/// Assign final byte offsets to every live selector used by `order`'s
/// classes and return the resulting hole map.
pub fn extract_holes(graph: &mut Graph, order: &[ClassId]) -> HoleMap {
    let mut by_bucket: BTreeMap<u32, Vec<cache_model::SelectorId>> = BTreeMap::new();
    let mut seen = std::collections::HashSet::new();
    for &class_id in order {
        if !graph.class(class_id).flags.should_generate_imp_cache {
            continue;
        }
        for m in &graph.class(class_id).methods {
            if !seen.insert(m.selector) {
                continue;
            }
            let bucket = graph.selectors.get(m.selector).in_progress_bucket_index;
            by_bucket.entry(bucket).or_default().push(m.selector);
        }
    }

    let magic = graph.selectors.magic;
    let mut current_end = graph.selectors.get(magic).size as u64;
    let mut holes = Vec::new();

    for (bucket, mut sel_ids) in by_bucket {
        let bucket_start = (bucket as u64) << 7;
        if bucket_start > current_end {
            holes.push(Hole {
                start: current_end,
                end: bucket_start,
            });
            current_end = bucket_start;
        }
        // The solver never assigns the intra-bucket byte offset (only which
        // bucket a selector lands in); order deterministically by name here.
        sel_ids.sort_by(|a, b| graph.selectors.get(*a).name.cmp(&graph.selectors.get(*b).name));
        for id in sel_ids {
            let size = graph.selectors.get(id).size;
            graph.selectors.get_mut(id).offset = Some(current_end as u32);
            current_end += size as u64;
        }
    }

    HoleMap {
        holes,
        end_address: current_end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase1;
    use crate::phase2;
    use cache_config::OptimizerConfig;
    use cache_graph::{build_graph, InputClass, InputDylib};
    use cache_model::Diagnostics;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn no_two_selectors_share_a_final_offset() {
        let dylibs = vec![InputDylib {
            install_name: "libA.dylib".to_string(),
            classes: vec![InputClass {
                name: "C".to_string(),
                is_metaclass: false,
                is_root_class: true,
                superclass: None,
                metaclass: None,
                methods: vec!["foo".to_string(), "bar".to_string()],
            }],
            categories: Vec::new(),
        }];
        let mut cfg = OptimizerConfig::default();
        cfg.needed_class_priority.insert("C".to_string(), 0);
        let mut diags = Diagnostics::new();
        let (mut graph, mut order) = build_graph(&dylibs, &cfg, &mut diags).unwrap();
        phase1::solve(&mut graph, &order, &mut diags);
        let mut rng = StdRng::seed_from_u64(1);
        phase2::pack(&mut graph, &mut order, &mut rng, &mut diags);

        extract_holes(&mut graph, &order);

        let mut offsets = Vec::new();
        for (_, sel) in graph.selectors.iter() {
            if let Some(offset) = sel.offset {
                offsets.push(offset);
            }
        }
        let unique: std::collections::HashSet<_> = offsets.iter().collect();
        assert_eq!(unique.len(), offsets.len());
    }

    #[test]
    fn add_string_of_size_prefers_a_fitting_hole_over_growing_the_watermark() {
        let mut map = HoleMap {
            holes: vec![Hole { start: 10, end: 20 }],
            end_address: 100,
        };
        let offset = map.add_string_of_size(5);
        assert_eq!(offset, 10);
        assert_eq!(map.end_address, 100);
    }
}
