use std::collections::HashMap;

use cache_config::OptimizerConfig;
use cache_graph::{InputCategory, InputClass, InputClassRef, InputDylib};
use cache_model::MAX_CACHE_MASK;

fn class(name: &str, methods: &[&str]) -> InputClass {
    InputClass {
        name: name.to_string(),
        is_metaclass: false,
        is_root_class: true,
        superclass: None,
        metaclass: None,
        methods: methods.iter().map(|m| m.to_string()).collect(),
    }
}

fn config(needed: &[&str]) -> OptimizerConfig {
    let mut cfg = OptimizerConfig::default();
    for (idx, name) in needed.iter().enumerate() {
        cfg.needed_class_priority.insert(name.to_string(), idx);
    }
    cfg
}

#[test]
fn a_single_class_gets_a_cache_with_every_method_reachable_by_its_selector_offset() {
    let dylibs = vec![InputDylib {
        install_name: "libA.dylib".to_string(),
        classes: vec![class("Widget", &["draw", "resize", "free"])],
        categories: Vec::new(),
    }];
    let cfg = config(&["Widget"]);

    let out = cache_bin::run_pipeline(&dylibs, &cfg, 1).unwrap();
    assert_eq!(out.caches.len(), 1);
    let cache = out.caches.values().next().unwrap();
    assert_eq!(cache.occupied, 3);
    assert_eq!(cache.buckets.iter().filter(|b| b.is_some()).count(), 3);
}

#[test]
fn a_shared_selector_across_unrelated_classes_resolves_to_a_slot_in_each_cache() {
    let dylibs = vec![InputDylib {
        install_name: "libA.dylib".to_string(),
        classes: vec![
            class("Foo", &["dealloc", "description"]),
            class("Bar", &["dealloc", "count", "isEqual:"]),
        ],
        categories: Vec::new(),
    }];
    let cfg = config(&["Foo", "Bar"]);

    let out = cache_bin::run_pipeline(&dylibs, &cfg, 2).unwrap();
    assert_eq!(out.caches.len(), 2);
    for cache in out.caches.values() {
        assert!(cache.buckets.iter().any(Option::is_some));
    }
}

#[test]
fn a_dropped_flattening_ancestor_cascades_the_drop_to_its_flattened_descendants() {
    let dylibs = vec![InputDylib {
        install_name: "libA.dylib".to_string(),
        classes: vec![
            InputClass {
                name: "OS_object".to_string(),
                is_metaclass: false,
                is_root_class: true,
                superclass: None,
                metaclass: None,
                methods: vec!["retain".to_string(), "release".to_string()],
            },
            InputClass {
                name: "OS_leaf".to_string(),
                is_metaclass: false,
                is_root_class: false,
                superclass: Some(InputClassRef {
                    install_name: "libA.dylib".to_string(),
                    name: "OS_object".to_string(),
                    is_metaclass: false,
                }),
                metaclass: None,
                methods: vec!["doWork".to_string()],
            },
        ],
        categories: Vec::new(),
    }];
    let mut cfg = config(&["OS_leaf"]);
    cfg.class_hierarchies_to_flatten.insert("OS_object".to_string());

    let out = cache_bin::run_pipeline(&dylibs, &cfg, 3).unwrap();
    let leaf = out
        .graph
        .classes
        .iter()
        .find(|c| &*c.name == "OS_leaf")
        .unwrap();
    assert!(leaf.is_in_flattening_hierarchy());
    assert!(leaf.methods.iter().any(|m| &*m.name == "retain"));
}

#[test]
fn a_class_whose_mask_exceeds_the_eleven_bit_limit_is_dropped_without_aborting_the_run() {
    let many_methods: Vec<String> = (0..5000).map(|i| format!("m{i}")).collect();
    let dylibs = vec![InputDylib {
        install_name: "libA.dylib".to_string(),
        classes: vec![
            InputClass {
                name: "Enormous".to_string(),
                is_metaclass: false,
                is_root_class: true,
                superclass: None,
                metaclass: None,
                methods: many_methods,
            },
            class("Normal", &["run"]),
        ],
        categories: Vec::new(),
    }];
    let cfg = config(&["Enormous", "Normal"]);

    let out = cache_bin::run_pipeline(&dylibs, &cfg, 4).unwrap();
    assert!(out.caches.values().all(|c| c.cache_mask <= MAX_CACHE_MASK));
    assert!(out.caches.keys().any(|k| &*k.class_name == "Normal"));
    assert!(!out.diagnostics.warnings.is_empty());
}

#[test]
fn duplicate_class_definitions_in_the_same_dylib_are_dropped_before_any_cache_is_built() {
    let dylibs = vec![InputDylib {
        install_name: "libA.dylib".to_string(),
        classes: vec![class("Dup", &["a"]), class("Dup", &["b"])],
        categories: Vec::new(),
    }];
    let cfg = config(&["Dup"]);

    let out = cache_bin::run_pipeline(&dylibs, &cfg, 5).unwrap();
    assert!(out.caches.is_empty());
    assert!(out
        .diagnostics
        .warnings
        .iter()
        .any(|w| w.message.contains("duplicate")));
}

#[test]
fn categories_attach_their_methods_only_within_the_same_dylib() {
    let dylibs = vec![
        InputDylib {
            install_name: "libA.dylib".to_string(),
            classes: vec![class("Host", &["base"])],
            categories: vec![InputCategory {
                name: "Local".to_string(),
                target_install_name: "libA.dylib".to_string(),
                target_class_name: "Host".to_string(),
                instance_methods: vec!["localExtra".to_string()],
                class_methods: Vec::new(),
            }],
        },
        InputDylib {
            install_name: "libB.dylib".to_string(),
            classes: Vec::new(),
            categories: vec![InputCategory {
                name: "Foreign".to_string(),
                target_install_name: "libA.dylib".to_string(),
                target_class_name: "Host".to_string(),
                instance_methods: vec!["foreignExtra".to_string()],
                class_methods: Vec::new(),
            }],
        },
    ];
    let cfg = config(&["Host"]);

    let out = cache_bin::run_pipeline(&dylibs, &cfg, 6).unwrap();
    let cache = out.caches.values().next().unwrap();
    let method_names: Vec<&str> = cache
        .buckets
        .iter()
        .flatten()
        .map(|b| b.method_name.as_str())
        .collect();
    assert!(method_names.contains(&"localExtra"));
    assert!(!method_names.contains(&"foreignExtra"));
}

#[test]
fn the_same_input_and_seed_produce_a_byte_identical_output_document() {
    let dylibs = vec![InputDylib {
        install_name: "libA.dylib".to_string(),
        classes: (0..30)
            .map(|i| class(&format!("Class{i}"), &["a", "b", "c", "d"]))
            .collect(),
        categories: Vec::new(),
    }];
    let mut cfg = OptimizerConfig::default();
    for i in 0..30 {
        cfg.needed_class_priority.insert(format!("Class{i}"), i);
    }

    let run_once = |cfg: &OptimizerConfig| {
        let out = cache_bin::run_pipeline(&dylibs, cfg, 123).unwrap();
        let mut offsets: HashMap<String, Vec<u32>> = HashMap::new();
        for (locator, cache) in &out.caches {
            let mut v: Vec<u32> = cache.buckets.iter().flatten().map(|b| b.sel_offset).collect();
            v.sort_unstable();
            offsets.insert(locator.class_name.to_string(), v);
        }
        offsets
    };

    assert_eq!(run_once(&cfg), run_once(&cfg));
}
