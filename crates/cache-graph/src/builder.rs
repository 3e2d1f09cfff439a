use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use cache_config::OptimizerConfig;
use cache_model::{
    Class, ClassId, ClassKey, Diagnostics, Method, MethodProvenance, OptimizerError, SelectorId,
    SelectorTable, MAX_SELECTOR_SPACE_BYTES,
};

use crate::input::InputDylib;

pub const CXX_CONSTRUCT: &str = ".cxx_construct";
pub const CXX_DESTRUCT: &str = ".cxx_destruct";

const TARGET: &str = "graph";

/// The normalized class/selector arena produced by [`build_graph`].
pub struct Graph {
    pub classes: Vec<Class>,
    pub selectors: SelectorTable,
}

impl Graph {
    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0 as usize]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.0 as usize]
    }
}

type LocatorKey = (String, String, bool);

/// Build the normalized graph and return it alongside the priority-ordered
/// list of "interesting" classes the solver should process (ss4.1).
pub fn build_graph(
    dylibs: &[InputDylib],
    config: &OptimizerConfig,
    diagnostics: &mut Diagnostics,
) -> Result<(Graph, Vec<ClassId>), OptimizerError> {
    let mut classes: Vec<Class> = Vec::new();
    let mut by_locator: HashMap<LocatorKey, ClassId> = HashMap::new();
    let mut duplicate_keys: HashSet<ClassKey> = HashSet::new();

    build_classes_map(dylibs, &mut classes, &mut by_locator, &mut duplicate_keys);
    resolve_pointers(dylibs, &by_locator, &mut classes);

    for class in classes.iter_mut() {
        class.interesting_priority = config.class_priority(&class.name, class.is_metaclass);
    }

    let interesting_ids: Vec<ClassId> = classes
        .iter()
        .enumerate()
        .filter(|(_, c)| c.interesting_priority.is_some())
        .map(|(i, _)| ClassId(i as u32))
        .collect();

    build_tracked_classes(&mut classes, &interesting_ids, &mut duplicate_keys);

    let mut selectors = SelectorTable::new();
    populate_method_lists(dylibs, &mut classes, &mut selectors, &by_locator, &duplicate_keys);
    attach_categories(dylibs, &mut classes, &mut selectors, &by_locator);
    compute_flattening_hierarchies(&mut classes, &interesting_ids, config);
    inline_selectors(&mut classes, &mut selectors, &interesting_ids, config);

    let total_bytes = selectors.total_size();
    if total_bytes >= MAX_SELECTOR_SPACE_BYTES {
        diagnostics.warn(
            TARGET,
            format!("selector address space overflow: {total_bytes} bytes; no caches built"),
        );
        return Err(OptimizerError::SelectorSpaceOverflow { total_bytes });
    }

    for &id in &interesting_ids {
        if classes[id.0 as usize].flags.is_part_of_duplicate_set {
            classes[id.0 as usize].flags.should_generate_imp_cache = false;
            diagnostics.warn(
                TARGET,
                format!(
                    "class {} dropped: duplicate definition across dylibs",
                    classes[id.0 as usize].name
                ),
            );
        }
    }

    let mut active = interesting_ids;
    active.sort_by_key(|&id| classes[id.0 as usize].interesting_priority.unwrap());
    let mut graph = Graph { classes, selectors };
    remove_uninteresting_classes(&mut graph, &mut active, diagnostics);

    Ok((graph, active))
}

fn build_classes_map(
    dylibs: &[InputDylib],
    classes: &mut Vec<Class>,
    by_locator: &mut HashMap<LocatorKey, ClassId>,
    duplicate_keys: &mut HashSet<ClassKey>,
) {
    let mut by_key: HashMap<ClassKey, Vec<ClassId>> = HashMap::new();
    for dylib in dylibs {
        let install_name: Rc<str> = Rc::from(dylib.install_name.as_str());
        for input_class in &dylib.classes {
            let name: Rc<str> = Rc::from(input_class.name.as_str());
            let class = Class::new(name.clone(), input_class.is_metaclass, install_name.clone());
            let id = ClassId(classes.len() as u32);
            classes.push(class);

            by_locator.insert(
                (
                    dylib.install_name.clone(),
                    input_class.name.clone(),
                    input_class.is_metaclass,
                ),
                id,
            );

            let key = ClassKey {
                name,
                is_metaclass: input_class.is_metaclass,
            };
            let entry = by_key.entry(key.clone()).or_default();
            if !entry.is_empty() {
                duplicate_keys.insert(key);
            }
            entry.push(id);
        }
    }
}

/// Resolve every class's superclass/metaclass pointer now that every stub
/// node exists. A reference that fails to resolve is a missing weak
/// dependency (ss4.1, ss7): silently left as `None`, never logged.
fn resolve_pointers(
    dylibs: &[InputDylib],
    by_locator: &HashMap<LocatorKey, ClassId>,
    classes: &mut [Class],
) {
    for dylib in dylibs {
        for input_class in &dylib.classes {
            let id = by_locator[&(
                dylib.install_name.clone(),
                input_class.name.clone(),
                input_class.is_metaclass,
            )];
            if let Some(sup) = &input_class.superclass {
                if let Some(&sup_id) =
                    by_locator.get(&(sup.install_name.clone(), sup.name.clone(), sup.is_metaclass))
                {
                    classes[id.0 as usize].superclass = Some(sup_id);
                }
            }
            if let Some(meta) = &input_class.metaclass {
                if let Some(&meta_id) = by_locator.get(&(
                    meta.install_name.clone(),
                    meta.name.clone(),
                    meta.is_metaclass,
                )) {
                    classes[id.0 as usize].metaclass = Some(meta_id);
                }
            }
        }
    }
}

fn build_tracked_classes(
    classes: &mut [Class],
    interesting_ids: &[ClassId],
    duplicate_keys: &mut HashSet<ClassKey>,
) {
    for &start in interesting_ids {
        let mut cursor = classes[start.0 as usize].superclass;
        let mut found_duplicate_ancestor = false;
        while let Some(cur) = cursor {
            classes[cur.0 as usize].tracked = true;
            if duplicate_keys.contains(&classes[cur.0 as usize].key()) {
                found_duplicate_ancestor = true;
            }
            cursor = classes[cur.0 as usize].superclass;
        }
        if found_duplicate_ancestor {
            duplicate_keys.insert(classes[start.0 as usize].key());
        }
    }
}

fn populate_method_lists(
    dylibs: &[InputDylib],
    classes: &mut [Class],
    selectors: &mut SelectorTable,
    by_locator: &HashMap<LocatorKey, ClassId>,
    duplicate_keys: &HashSet<ClassKey>,
) {
    for dylib in dylibs {
        for input_class in &dylib.classes {
            let id = by_locator[&(
                dylib.install_name.clone(),
                input_class.name.clone(),
                input_class.is_metaclass,
            )];
            let (relevant, is_dup) = {
                let class = &classes[id.0 as usize];
                (
                    class.is_interesting() || class.tracked,
                    duplicate_keys.contains(&class.key()),
                )
            };
            if !relevant {
                continue;
            }
            for method_name in &input_class.methods {
                let sel_id = selectors.intern(method_name);
                selectors.get_mut(sel_id).add_class(id);
                classes[id.0 as usize].methods.push(Method {
                    selector: sel_id,
                    name: Rc::from(method_name.as_str()),
                    category: None,
                    provenance: MethodProvenance {
                        declaring_class: id,
                        was_inlined: false,
                        from_flattening: false,
                    },
                });
            }
            classes[id.0 as usize].flags.is_part_of_duplicate_set = is_dup;
        }
    }
}

fn attach_categories(
    dylibs: &[InputDylib],
    classes: &mut [Class],
    selectors: &mut SelectorTable,
    by_locator: &HashMap<LocatorKey, ClassId>,
) {
    for dylib in dylibs {
        for category in &dylib.categories {
            if category.target_install_name != dylib.install_name {
                continue; // cross-dylib categories ignored at this layer (ss4.1)
            }
            let Some(&target_id) = by_locator.get(&(
                dylib.install_name.clone(),
                category.target_class_name.clone(),
                false,
            )) else {
                continue; // weak/missing target
            };

            for m in &category.instance_methods {
                let sel_id = selectors.intern(m);
                selectors.get_mut(sel_id).add_class(target_id);
                classes[target_id.0 as usize].methods.push(Method {
                    selector: sel_id,
                    name: Rc::from(m.as_str()),
                    category: Some(Rc::from(category.name.as_str())),
                    provenance: MethodProvenance {
                        declaring_class: target_id,
                        was_inlined: false,
                        from_flattening: false,
                    },
                });
            }

            let meta_id = classes[target_id.0 as usize].metaclass.or_else(|| {
                by_locator
                    .get(&(
                        dylib.install_name.clone(),
                        category.target_class_name.clone(),
                        true,
                    ))
                    .copied()
            });
            if let Some(meta_id) = meta_id {
                for m in &category.class_methods {
                    let sel_id = selectors.intern(m);
                    selectors.get_mut(sel_id).add_class(meta_id);
                    classes[meta_id.0 as usize].methods.push(Method {
                        selector: sel_id,
                        name: Rc::from(m.as_str()),
                        category: Some(Rc::from(category.name.as_str())),
                        provenance: MethodProvenance {
                            declaring_class: meta_id,
                            was_inlined: false,
                            from_flattening: false,
                        },
                    });
                }
            }
        }
    }
}

fn compute_flattening_hierarchies(
    classes: &mut [Class],
    interesting_ids: &[ClassId],
    config: &OptimizerConfig,
) {
    for &start in interesting_ids {
        let is_meta = classes[start.0 as usize].is_metaclass;
        let mut chain_names: HashSet<Rc<str>> = HashSet::new();
        let mut cursor = classes[start.0 as usize].superclass;
        let mut root_found: Option<ClassId> = None;
        while let Some(cur) = cursor {
            let cur_name = classes[cur.0 as usize].name.clone();
            chain_names.insert(cur_name.clone());
            if config.is_flattening_root(&cur_name, is_meta) {
                root_found = Some(cur);
                break;
            }
            cursor = classes[cur.0 as usize].superclass;
        }
        if let Some(root_id) = root_found {
            let root_name = classes[root_id.0 as usize].name.clone();
            let root_superclass_locator = classes[root_id.0 as usize]
                .superclass
                .map(|sc| classes[sc.0 as usize].locator());
            classes[start.0 as usize].flattening_root_name = Some(root_name);
            classes[start.0 as usize].flattening_root_superclass = root_superclass_locator;
            classes[start.0 as usize].flattened_superclasses = chain_names;
        }
    }
}

/// Walk each interesting class's superclass chain inlining methods.
/// `selectorsToInline` applies along the full chain; flattening-driven
/// inlining only applies up to and including the flattening root (ss4.1).
fn inline_selectors(
    classes: &mut [Class],
    selectors: &mut SelectorTable,
    interesting_ids: &[ClassId],
    config: &OptimizerConfig,
) {
    for &start in interesting_ids {
        let flattening_root_name = classes[start.0 as usize].flattening_root_name.clone();
        let mut current_selectors: HashSet<SelectorId> = classes[start.0 as usize]
            .methods
            .iter()
            .map(|m| m.selector)
            .collect();

        let mut passed_root = flattening_root_name.is_none();
        let mut cursor = classes[start.0 as usize].superclass;
        while let Some(cur) = cursor {
            let cur_name = classes[cur.0 as usize].name.clone();
            let is_root = flattening_root_name.as_deref() == Some(&*cur_name);
            let within_flattening_range = !passed_root;
            let ancestor_methods: Vec<Method> = classes[cur.0 as usize].methods.clone();

            for m in ancestor_methods {
                let sel_name = selectors.get(m.selector).name.clone();
                if &*sel_name == CXX_CONSTRUCT || &*sel_name == CXX_DESTRUCT {
                    continue;
                }
                if current_selectors.contains(&m.selector) {
                    continue; // never re-inline an already-inlined method
                }
                let in_config = config.selectors_to_inline.contains(&*sel_name);
                let in_flattening = within_flattening_range;
                if in_config || in_flattening {
                    classes[start.0 as usize].methods.push(Method {
                        selector: m.selector,
                        name: m.name.clone(),
                        category: m.category.clone(),
                        provenance: MethodProvenance {
                            declaring_class: m.provenance.declaring_class,
                            was_inlined: true,
                            from_flattening: in_flattening,
                        },
                    });
                    current_selectors.insert(m.selector);
                    selectors.get_mut(m.selector).add_class(start);
                }
            }

            if is_root {
                passed_root = true;
            }
            cursor = classes[cur.0 as usize].superclass;
        }
    }
}

/// Drop classes with no methods (unless they anchor a flattening hierarchy)
/// or whose `shouldGenerateImpCache` flag a prior phase already cleared;
/// unlink their selectors and prune any selector left with no classes.
/// Called once after graph build, and again after each solver/packer phase
/// that can drop classes (ss4.1).
pub fn remove_uninteresting_classes(
    graph: &mut Graph,
    active: &mut Vec<ClassId>,
    diagnostics: &mut Diagnostics,
) {
    let mut keep = Vec::with_capacity(active.len());
    for &id in active.iter() {
        let class = &graph.classes[id.0 as usize];
        let no_methods_and_not_flattening =
            class.methods.is_empty() && !class.is_in_flattening_hierarchy();
        let already_dropped = !class.flags.should_generate_imp_cache;
        if no_methods_and_not_flattening || already_dropped {
            if no_methods_and_not_flattening && !already_dropped {
                diagnostics.warn(
                    TARGET,
                    format!(
                        "class {} dropped: no methods and not part of a flattening hierarchy",
                        class.name
                    ),
                );
            }
            let method_selectors: Vec<SelectorId> = graph.classes[id.0 as usize]
                .methods
                .iter()
                .map(|m| m.selector)
                .collect();
            for sel in method_selectors {
                graph.selectors.get_mut(sel).remove_class(id);
                graph.selectors.remove_if_orphaned(sel);
            }
            graph.classes[id.0 as usize].flags.should_generate_imp_cache = false;
        } else {
            keep.push(id);
        }
    }
    *active = keep;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{InputCategory, InputClass, InputClassRef};

    fn dylib(install_name: &str, classes: Vec<InputClass>) -> InputDylib {
        InputDylib {
            install_name: install_name.to_string(),
            classes,
            categories: Vec::new(),
        }
    }

    fn class(name: &str, superclass: Option<(&str, &str)>, methods: Vec<&str>) -> InputClass {
        InputClass {
            name: name.to_string(),
            is_metaclass: false,
            is_root_class: superclass.is_none(),
            superclass: superclass.map(|(install, n)| InputClassRef {
                install_name: install.to_string(),
                name: n.to_string(),
                is_metaclass: false,
            }),
            metaclass: None,
            methods: methods.into_iter().map(String::from).collect(),
        }
    }

    fn config(needed: &[&str]) -> OptimizerConfig {
        let mut cfg = OptimizerConfig::default();
        for (i, name) in needed.iter().enumerate() {
            cfg.needed_class_priority.insert(name.to_string(), i);
        }
        cfg.class_hierarchies_to_flatten.insert("OS_object".to_string());
        cfg
    }

    #[test]
    fn trivial_graph_produces_one_class_with_its_own_methods() {
        let dylibs = vec![dylib(
            "libFoo.dylib",
            vec![class("Leaf", None, vec!["a", "b"])],
        )];
        let cfg = config(&["Leaf"]);
        let mut diags = Diagnostics::new();
        let (graph, active) = build_graph(&dylibs, &cfg, &mut diags).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(graph.class(active[0]).methods.len(), 2);
    }

    #[test]
    fn shared_selector_is_tracked_by_every_class_that_declares_it() {
        let dylibs = vec![dylib(
            "libFoo.dylib",
            vec![
                class("A", None, vec!["shared"]),
                class("B", None, vec!["shared"]),
            ],
        )];
        let cfg = config(&["A", "B"]);
        let mut diags = Diagnostics::new();
        let (graph, _active) = build_graph(&dylibs, &cfg, &mut diags).unwrap();
        let sel_id = graph
            .selectors
            .iter()
            .find(|(_, s)| &*s.name == "shared")
            .map(|(id, _)| id)
            .unwrap();
        assert_eq!(graph.selectors.get(sel_id).classes.len(), 2);
    }

    #[test]
    fn flattening_hierarchy_inlines_ancestor_methods_into_the_leaf() {
        let dylibs = vec![dylib(
            "libFoo.dylib",
            vec![
                class("Root", None, vec!["a", "b"]),
                class("Mid", Some(("libFoo.dylib", "Root")), vec!["c"]),
                class("Leaf", Some(("libFoo.dylib", "Mid")), vec!["d"]),
            ],
        )];
        let mut cfg = config(&["Leaf"]);
        cfg.class_hierarchies_to_flatten.clear();
        cfg.class_hierarchies_to_flatten.insert("Root".to_string());
        let mut diags = Diagnostics::new();
        let (graph, active) = build_graph(&dylibs, &cfg, &mut diags).unwrap();
        assert_eq!(active.len(), 1);
        let leaf = graph.class(active[0]);
        let names: HashSet<&str> = leaf.methods.iter().map(|m| &*m.name).collect();
        assert_eq!(names, HashSet::from(["a", "b", "c", "d"]));
        let a = leaf.methods.iter().find(|m| &*m.name == "a").unwrap();
        assert!(a.provenance.was_inlined);
        assert!(a.provenance.from_flattening);
    }

    #[test]
    fn duplicate_class_definitions_are_flagged_and_dropped() {
        let dylibs = vec![
            dylib("libFoo.dylib", vec![class("Dup", None, vec!["a"])]),
            dylib("libBar.dylib", vec![class("Dup", None, vec!["a"])]),
        ];
        let cfg = config(&["Dup"]);
        let mut diags = Diagnostics::new();
        let (_graph, active) = build_graph(&dylibs, &cfg, &mut diags).unwrap();
        assert!(active.is_empty());
        assert!(diags.warning_count() > 0);
    }

    #[test]
    fn dangling_superclass_reference_is_treated_as_a_missing_weak_dependency() {
        let dylibs = vec![dylib(
            "libFoo.dylib",
            vec![class("Leaf", Some(("libMissing.dylib", "Ghost")), vec!["a"])],
        )];
        let cfg = config(&["Leaf"]);
        let mut diags = Diagnostics::new();
        let (graph, active) = build_graph(&dylibs, &cfg, &mut diags).unwrap();
        assert_eq!(active.len(), 1);
        assert!(graph.class(active[0]).superclass.is_none());
    }

    #[test]
    fn category_methods_attach_only_within_the_same_dylib() {
        let mut libfoo = dylib("libFoo.dylib", vec![class("Leaf", None, vec!["a"])]);
        libfoo.categories.push(InputCategory {
            name: "Leaf+Extras".to_string(),
            target_install_name: "libFoo.dylib".to_string(),
            target_class_name: "Leaf".to_string(),
            instance_methods: vec!["extra".to_string()],
            class_methods: Vec::new(),
        });
        let mut libbar = dylib("libBar.dylib", Vec::new());
        libbar.categories.push(InputCategory {
            name: "Leaf+CrossDylib".to_string(),
            target_install_name: "libFoo.dylib".to_string(),
            target_class_name: "Leaf".to_string(),
            instance_methods: vec!["ignored".to_string()],
            class_methods: Vec::new(),
        });
        let dylibs = vec![libfoo, libbar];
        let cfg = config(&["Leaf"]);
        let mut diags = Diagnostics::new();
        let (graph, active) = build_graph(&dylibs, &cfg, &mut diags).unwrap();
        let names: HashSet<&str> =
            graph.class(active[0]).methods.iter().map(|m| &*m.name).collect();
        assert_eq!(names, HashSet::from(["a", "extra"]));
    }
}
