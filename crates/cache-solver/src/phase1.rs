//! Phase 1 placement solver (ss4.3): backtracking search that assigns a
//! `(shift, mask)` to every class and commits bits into each of its
//! methods' selectors, such that every method lands in a distinct slot.

use std::collections::HashMap;

use cache_graph::Graph;
use cache_model::{ClassId, Diagnostics, Method, SelectorId, MAX_SHIFT_PLUS_BITS};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::drop::cascade_flattening_drop;

const SEED: u64 = 0x5A17_C0DE_B16B_00B5;
const FAILURE_THRESHOLD: u32 = 10;
const MAX_BACKTRACK_LENGTH: usize = 1024;
const TARGET: &str = "solver";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PlacementAttempt {
    needed_bits: u32,
    shift: u32,
    total_bits_to_set: u32,
}

#[derive(Debug, Clone)]
struct PreviousState {
    class_id: ClassId,
    prior_shift: u32,
    prior_needed_bits: u32,
    prior_slots: Vec<Option<SelectorId>>,
    method_states: Vec<(SelectorId, u32, u32)>,
}

#[derive(Debug, Clone)]
struct AppliedStep {
    class_id: ClassId,
    attempt_index: usize,
    rng_before: StdRng,
    previous: PreviousState,
}

#[derive(Debug, Clone)]
enum StackEntry {
    Applied(AppliedStep),
    Dropped(ClassId),
}

fn stack_entry_key(entry: &StackEntry) -> (u8, u32, usize) {
    match entry {
        StackEntry::Applied(step) => (0, step.class_id.0, step.attempt_index),
        StackEntry::Dropped(id) => (1, id.0, 0),
    }
}

fn bits_needed(method_count: u32) -> u32 {
    if method_count <= 1 {
        0
    } else {
        32 - (method_count - 1).leading_zeros()
    }
}

fn attempts(graph: &Graph, class_id: ClassId) -> Vec<PlacementAttempt> {
    let class = graph.class(class_id);
    let method_count = class.methods.len() as u32;
    if method_count == 0 {
        return Vec::new();
    }
    let base_bits = bits_needed(method_count);
    let mut out = Vec::new();
    for needed_bits in [base_bits, base_bits + 1] {
        if needed_bits > MAX_SHIFT_PLUS_BITS {
            continue;
        }
        let max_shift = MAX_SHIFT_PLUS_BITS - needed_bits;
        let mask = if needed_bits == 0 {
            0
        } else {
            (1u32 << needed_bits) - 1
        };
        for shift in 0..=max_shift {
            let total: u32 = class
                .methods
                .iter()
                .map(|m| graph.selectors.get(m.selector).number_of_bits_to_set(shift, mask))
                .sum();
            out.push(PlacementAttempt {
                needed_bits,
                shift,
                total_bits_to_set: total,
            });
        }
    }
    out.sort_by_key(|a| (a.total_bits_to_set, a.needed_bits, a.shift));
    out
}

/// Try to apply `attempt` to `class_id`. Returns `None` (graph untouched)
/// if any method cannot find a compatible free slot.
fn apply_attempt(
    graph: &mut Graph,
    class_id: ClassId,
    attempt: &PlacementAttempt,
    rng: &mut StdRng,
) -> Option<PreviousState> {
    let needed_bits = attempt.needed_bits;
    let shift = attempt.shift;
    let mask = if needed_bits == 0 {
        0
    } else {
        (1u32 << needed_bits) - 1
    };
    let window = mask << shift;

    let class = graph.class(class_id);
    let prior_shift = class.shift;
    let prior_needed_bits = class.needed_bits;
    let prior_slots = class.slots.clone();

    let mut methods: Vec<Method> = class.methods.clone();
    methods.sort_by_key(|m| graph.selectors.get(m.selector).number_of_bits_to_set(shift, mask));

    let mut slots: Vec<Option<SelectorId>> = vec![None; 1usize << needed_bits];
    let mut method_states = Vec::with_capacity(methods.len());
    let mut commits: Vec<(SelectorId, u32, u32)> = Vec::with_capacity(methods.len());

    for m in &methods {
        let sel = graph.selectors.get(m.selector);
        let prior_in_progress = sel.in_progress_bucket_index;
        let prior_fixed = sel.fixed_bits_mask;

        if (prior_fixed & window) == window {
            let slot = ((prior_in_progress >> shift) & mask) as usize;
            if slots[slot].is_some() {
                return None;
            }
            slots[slot] = Some(m.selector);
            method_states.push((m.selector, prior_in_progress, prior_fixed));
            continue;
        }

        let mut candidates: Vec<u32> = (0..=mask).collect();
        candidates.shuffle(rng);
        let mut placed = false;
        for v in candidates {
            let tentative = prior_in_progress | (v << shift);
            if (tentative & prior_fixed) != (prior_in_progress & prior_fixed) {
                continue;
            }
            let slot = v as usize;
            if slots[slot].is_some() {
                continue;
            }
            slots[slot] = Some(m.selector);
            method_states.push((m.selector, prior_in_progress, prior_fixed));
            commits.push((m.selector, tentative, prior_fixed | window));
            placed = true;
            break;
        }
        if !placed {
            return None;
        }
    }

    for (sel_id, new_in_progress, new_fixed) in commits {
        let sel = graph.selectors.get_mut(sel_id);
        sel.in_progress_bucket_index = new_in_progress;
        sel.fixed_bits_mask = new_fixed;
    }

    let class = graph.class_mut(class_id);
    class.shift = shift;
    class.needed_bits = needed_bits;
    class.slots = slots;

    Some(PreviousState {
        class_id,
        prior_shift,
        prior_needed_bits,
        prior_slots,
        method_states,
    })
}

fn undo(graph: &mut Graph, state: PreviousState) {
    for (sel_id, prior_in_progress, prior_fixed) in state.method_states {
        let sel = graph.selectors.get_mut(sel_id);
        sel.in_progress_bucket_index = prior_in_progress;
        sel.fixed_bits_mask = prior_fixed;
    }
    let class = graph.class_mut(state.class_id);
    class.shift = state.prior_shift;
    class.needed_bits = state.prior_needed_bits;
    class.slots = state.prior_slots;
}

/// Run Phase 1 over the priority-ordered interesting-class list. Classes
/// left with `shouldGenerateImpCache == false` on return were dropped,
/// either by exhausting the backtracking budget or by flattening cascade.
pub fn solve(graph: &mut Graph, order: &[ClassId], diagnostics: &mut Diagnostics) {
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut attempt_cache: HashMap<ClassId, Vec<PlacementAttempt>> = HashMap::new();
    let mut next_attempt_index: Vec<usize> = vec![0; order.len()];
    let mut stack: Vec<StackEntry> = Vec::with_capacity(order.len());
    let mut i = 0usize;
    let mut consecutive_failures: u32 = 0;
    let mut backtracking_length: usize = 1;
    let mut best_snapshot: Option<Vec<StackEntry>> = None;
    let mut best_depth: usize = 0;

    while i < order.len() {
        let class_id = order[i];
        let skip = {
            let class = graph.class(class_id);
            class.methods.is_empty() || !class.flags.should_generate_imp_cache
        };
        if skip {
            if graph.class(class_id).methods.is_empty() {
                graph.class_mut(class_id).flags.should_generate_imp_cache = false;
            }
            stack.push(StackEntry::Dropped(class_id));
            i += 1;
            continue;
        }

        let class_attempts = attempt_cache
            .entry(class_id)
            .or_insert_with(|| attempts(graph, class_id));
        let cursor = next_attempt_index[i];

        if cursor >= class_attempts.len() {
            // Exhausted every attempt for this class: back up.
            consecutive_failures += 1;

            if consecutive_failures >= FAILURE_THRESHOLD {
                if let Some(snapshot) = best_snapshot.clone() {
                    restore_from_snapshot(graph, &mut stack, &snapshot, &mut attempt_cache);
                    i = stack.len();
                }
                let drop_id = order[i.min(order.len() - 1)];
                graph.class_mut(drop_id).flags.should_generate_imp_cache = false;
                cascade_flattening_drop(graph, order, drop_id);
                diagnostics.warn(
                    TARGET,
                    format!(
                        "class {} dropped: placement search exhausted after repeated failures",
                        graph.class(drop_id).name
                    ),
                );
                stack.push(StackEntry::Dropped(drop_id));
                i += 1;
                consecutive_failures = 0;
                continue;
            }

            let pop_count = backtracking_length.min(stack.len());
            if pop_count == 0 {
                // Nothing left to backtrack into; drop this class and move on.
                graph.class_mut(class_id).flags.should_generate_imp_cache = false;
                diagnostics.warn(
                    TARGET,
                    format!("class {} dropped: no placement exists", graph.class(class_id).name),
                );
                cascade_flattening_drop(graph, order, class_id);
                stack.push(StackEntry::Dropped(class_id));
                i += 1;
                continue;
            }
            for _ in 0..pop_count {
                match stack.pop() {
                    Some(StackEntry::Applied(step)) => undo(graph, step.previous),
                    Some(StackEntry::Dropped(_)) | None => {}
                }
            }
            i -= pop_count;
            next_attempt_index[i] += 1;
            backtracking_length = (backtracking_length * 2).min(MAX_BACKTRACK_LENGTH).min(stack.len().max(1));
            continue;
        }

        let rng_before = rng.clone();
        let attempt = class_attempts[cursor];
        match apply_attempt(graph, class_id, &attempt, &mut rng) {
            Some(previous) => {
                stack.push(StackEntry::Applied(AppliedStep {
                    class_id,
                    attempt_index: cursor,
                    rng_before,
                    previous,
                }));
                i += 1;
                consecutive_failures = 0;
                backtracking_length = 1;
                if stack.len() > best_depth {
                    best_depth = stack.len();
                    best_snapshot = Some(stack.clone());
                }
            }
            None => {
                next_attempt_index[i] += 1;
            }
        }
    }
}

fn restore_from_snapshot(
    graph: &mut Graph,
    stack: &mut Vec<StackEntry>,
    snapshot: &[StackEntry],
    attempt_cache: &mut HashMap<ClassId, Vec<PlacementAttempt>>,
) {
    let mut common = 0;
    while common < stack.len()
        && common < snapshot.len()
        && stack_entry_key(&stack[common]) == stack_entry_key(&snapshot[common])
    {
        common += 1;
    }

    while stack.len() > common {
        match stack.pop() {
            Some(StackEntry::Applied(step)) => undo(graph, step.previous),
            Some(StackEntry::Dropped(_)) | None => {}
        }
    }

    for entry in &snapshot[common..] {
        match entry {
            StackEntry::Dropped(class_id) => stack.push(StackEntry::Dropped(*class_id)),
            StackEntry::Applied(step) => {
                let mut replay_rng = step.rng_before.clone();
                let class_attempts = attempt_cache
                    .entry(step.class_id)
                    .or_insert_with(|| attempts(graph, step.class_id));
                let attempt = class_attempts[step.attempt_index];
                let previous = apply_attempt(graph, step.class_id, &attempt, &mut replay_rng)
                    .expect("snapshot replay is deterministic");
                stack.push(StackEntry::Applied(AppliedStep {
                    class_id: step.class_id,
                    attempt_index: step.attempt_index,
                    rng_before: step.rng_before.clone(),
                    previous,
                }));
            }
        }
    }
}
