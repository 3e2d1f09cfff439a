use cache_graph::Graph;
use cache_model::ClassId;

/// Cascade a class drop through its flattening hierarchy: every other class
/// sharing the same flattening root whose `flattenedSuperclasses` names the
/// dropped class is dropped too, with the cascade flag set (ss4.3, property 6).
pub fn cascade_flattening_drop(graph: &mut Graph, order: &[ClassId], dropped_id: ClassId) {
    let dropped_name = graph.class(dropped_id).name.clone();
    let Some(root_name) = graph.class(dropped_id).flattening_root_name.clone() else {
        return;
    };

    for &other in order {
        if other == dropped_id {
            continue;
        }
        let other_class = graph.class(other);
        if other_class.flattening_root_name.as_ref() != Some(&root_name) {
            continue;
        }
        if !other_class.flattened_superclasses.contains(&dropped_name) {
            continue;
        }
        let c = graph.class_mut(other);
        c.flags.should_generate_imp_cache = false;
        c.flags.dropped_because_flattening_superclass_was_dropped = true;
    }
}
