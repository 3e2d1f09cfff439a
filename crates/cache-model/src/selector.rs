use std::collections::HashMap;
use std::rc::Rc;

use crate::class::ClassId;

/// Reserved name for the sentinel selector that reserves address 0.
pub const MAGIC_SELECTOR_NAME: &str = "\u{0}impcache.magic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SelectorId(pub u32);

/// An interned selector and its current placement state.
///
/// `in_progress_bucket_index` and `fixed_bits_mask` are mutated throughout
/// Phase 1 and Phase 2; `offset` is only ever set once, by the packer.
#[derive(Debug, Clone)]
pub struct Selector {
    pub name: Rc<str>,
    pub size: u32,
    pub in_progress_bucket_index: u32,
    pub fixed_bits_mask: u32,
    pub offset: Option<u32>,
    pub classes: Vec<ClassId>,
}

impl Selector {
    fn new(name: Rc<str>) -> Self {
        let size = name.len() as u32 + 1;
        Self {
            name,
            size,
            in_progress_bucket_index: 0,
            fixed_bits_mask: 0,
            offset: None,
            classes: Vec::new(),
        }
    }

    /// Bits within `mask << shift` not already locked by `fixed_bits_mask`.
    pub fn number_of_bits_to_set(&self, shift: u32, mask: u32) -> u32 {
        let window = mask << shift;
        (window & !self.fixed_bits_mask).count_ones()
    }

    pub fn add_class(&mut self, class: ClassId) {
        if !self.classes.contains(&class) {
            self.classes.push(class);
        }
    }

    pub fn remove_class(&mut self, class: ClassId) {
        self.classes.retain(|&c| c != class);
    }

    pub fn is_live(&self) -> bool {
        !self.classes.is_empty()
    }
}

/// Interning table mapping selector names to stable `SelectorId`s.
///
/// Removal never shrinks the backing arena (IDs must stay stable for the
/// lifetime of the solver); a selector is "removed" by dropping it from the
/// name index and clearing its class list, matching the reference tool's
/// map-based removal without requiring index-stable deletion from a vector.
#[derive(Debug)]
pub struct SelectorTable {
    by_name: HashMap<Rc<str>, SelectorId>,
    selectors: Vec<Selector>,
    pub magic: SelectorId,
}

impl SelectorTable {
    pub fn new() -> Self {
        let mut table = Self {
            by_name: HashMap::new(),
            selectors: Vec::new(),
            magic: SelectorId(0),
        };
        let magic = table.intern(MAGIC_SELECTOR_NAME);
        table.selectors[magic.0 as usize].offset = Some(0);
        table.magic = magic;
        table
    }

    pub fn intern(&mut self, name: &str) -> SelectorId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let rc: Rc<str> = Rc::from(name);
        let id = SelectorId(self.selectors.len() as u32);
        self.selectors.push(Selector::new(rc.clone()));
        self.by_name.insert(rc, id);
        id
    }

    pub fn get(&self, id: SelectorId) -> &Selector {
        &self.selectors[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SelectorId) -> &mut Selector {
        &mut self.selectors[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SelectorId, &Selector)> {
        self.selectors
            .iter()
            .enumerate()
            .map(|(i, s)| (SelectorId(i as u32), s))
    }

    /// Sum of all interned selector sizes, including dead ones still resident
    /// in the arena. Used for the pre-solve 16MiB cap (ss4.1).
    pub fn total_size(&self) -> u64 {
        self.selectors.iter().map(|s| s.size as u64).sum()
    }

    /// Unlink a selector from the name index once its class list is empty.
    /// No-op for the magic selector, which is never removed.
    pub fn remove_if_orphaned(&mut self, id: SelectorId) {
        if id == self.magic {
            return;
        }
        let selector = &self.selectors[id.0 as usize];
        if selector.classes.is_empty() {
            let name = selector.name.clone();
            self.by_name.remove(&name);
        }
    }
}

impl Default for SelectorTable {
    fn default() -> Self {
        Self::new()
    }
}
