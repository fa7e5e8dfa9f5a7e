//! 2D shelf packer for atlas UV allocation.
//!
//! The atlas is cut into fixed-width columns; shelves are horizontal bands
//! carved from a column, grouped into height categories (a floating-point
//! style split: the height's top `sl_width + 1` bits pick the category).
//! Slots are ranges along a shelf. Free ranges merge with their neighbours
//! on release, and a fully-empty shelf returns its band to the column.

use kryne_core::common::alignment::align_up;
use kryne_core::common::bit_utils::{bit_mask, most_significant_bit};
use kryne_core::{ke_assert, verify_or_return};

const NIL: u32 = u32::MAX;

/// Slot ids are plain `u32`; this marks a failed allocation.
pub const INVALID_SLOT: u32 = u32::MAX;

#[derive(Clone, Copy, Debug)]
pub struct AtlasConfig {
    pub atlas_size: (u32, u32),
    pub shelf_width: u32,
    pub min_height: u32,
    /// Second-level split width, in bits, of the height categories.
    pub sl_width: u32,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        AtlasConfig {
            atlas_size: (1024, 1024),
            shelf_width: 512,
            min_height: 16,
            sl_width: 2,
        }
    }
}

/// Vec-backed node storage with an intrusive free list.
struct NodePool<T> {
    entries: Vec<T>,
    free_next: Vec<u32>,
    free_head: u32,
}

impl<T: Default> NodePool<T> {
    fn new() -> Self {
        NodePool {
            entries: Vec::new(),
            free_next: Vec::new(),
            free_head: NIL,
        }
    }

    fn allocate(&mut self) -> u32 {
        if self.free_head != NIL {
            let index = self.free_head;
            self.free_head = self.free_next[index as usize];
            self.entries[index as usize] = T::default();
            index
        } else {
            self.entries.push(T::default());
            self.free_next.push(NIL);
            (self.entries.len() - 1) as u32
        }
    }

    fn free(&mut self, index: u32) {
        self.free_next[index as usize] = self.free_head;
        self.free_head = index;
    }
}

impl<T> std::ops::Index<u32> for NodePool<T> {
    type Output = T;
    fn index(&self, index: u32) -> &T {
        &self.entries[index as usize]
    }
}

impl<T> std::ops::IndexMut<u32> for NodePool<T> {
    fn index_mut(&mut self, index: u32) -> &mut T {
        &mut self.entries[index as usize]
    }
}

/// A free vertical band of a column. `start` encodes
/// `column * atlas_height + y`, so bands sort globally.
#[derive(Clone, Copy, Debug, Default)]
struct FreeShelfEntry {
    start: u32,
    size: u32,
}

#[derive(Clone, Copy, Debug)]
struct ShelfEntry {
    start: u32,
    size: u32,
    /// Head of this shelf's free-slot list.
    first_free: u32,
    /// Next/previous shelf of the same category.
    next: u32,
    prev: u32,
}

impl Default for ShelfEntry {
    fn default() -> Self {
        ShelfEntry {
            start: 0,
            size: 0,
            first_free: NIL,
            next: NIL,
            prev: NIL,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct FreeSlotEntry {
    start: u32,
    width: u32,
    next: u32,
    prev: u32,
}

impl Default for FreeSlotEntry {
    fn default() -> Self {
        FreeSlotEntry {
            start: 0,
            width: 0,
            next: NIL,
            prev: NIL,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct SlotEntry {
    shelf: u32,
    start: u32,
    width: u32,
}

pub struct AtlasShelfAllocator {
    atlas_size: (u32, u32),
    shelf_width: u32,
    min_height: u32,
    sl_width: u32,

    /// Sorted by `start`.
    free_shelves: Vec<FreeShelfEntry>,
    shelves: NodePool<ShelfEntry>,
    /// `(category, head shelf)` pairs, sorted by category.
    shelf_categories: Vec<(u32, u32)>,
    free_slots: NodePool<FreeSlotEntry>,
    slots: Vec<SlotEntry>,
    /// Free-list head through `SlotEntry::shelf`.
    next_slot_index: u32,
}

const BLOCK_ALIGNMENT: u32 = 4;

impl AtlasShelfAllocator {
    pub fn new(config: &AtlasConfig) -> Self {
        ke_assert!(config.atlas_size.0 % config.shelf_width == 0);
        ke_assert!(config.min_height >> config.sl_width >= BLOCK_ALIGNMENT);

        let columns = config.atlas_size.0 / config.shelf_width;
        let free_shelves = (0..columns)
            .map(|column| FreeShelfEntry {
                start: column * config.atlas_size.1,
                size: config.atlas_size.1,
            })
            .collect();

        AtlasShelfAllocator {
            atlas_size: config.atlas_size,
            shelf_width: config.shelf_width,
            min_height: config.min_height,
            sl_width: config.sl_width,
            free_shelves,
            shelves: NodePool::new(),
            shelf_categories: Vec::new(),
            free_slots: NodePool::new(),
            slots: Vec::new(),
            next_slot_index: NIL,
        }
    }

    /// Position of a slot inside the atlas, in pixels.
    pub fn slot_position(&self, slot: u32) -> (u32, u32) {
        let entry = self.slots[slot as usize];
        let shelf = &self.shelves[entry.shelf];
        let column = shelf.start / self.atlas_size.1;
        let y = shelf.start % self.atlas_size.1;
        (column * self.shelf_width + entry.start, y)
    }

    pub fn allocate(&mut self, slot_size: (u32, u32)) -> u32 {
        let mut slot_height = align_up(slot_size.1, BLOCK_ALIGNMENT);
        let slot_width = align_up(slot_size.0, BLOCK_ALIGNMENT);

        verify_or_return!(
            slot_width <= self.shelf_width && slot_height <= self.atlas_size.1,
            INVALID_SLOT
        );

        // Round the height up so that it carries at most sl_width + 1
        // significant bits, the category granularity.
        if slot_height > self.min_height {
            let msb = most_significant_bit(slot_height).unwrap_or(0);
            if msb > self.sl_width {
                slot_height += (1 << (msb - self.sl_width)) - 1;
            }
        }
        slot_height = slot_height.max(self.min_height);

        let msb = most_significant_bit(slot_height).unwrap_or(0);
        let category = slot_height & (bit_mask(self.sl_width + 1, 0) << (msb - self.sl_width));
        let allocated_height = category;

        // First category that can hold the request.
        let position = self
            .shelf_categories
            .partition_point(|(existing, _)| *existing < category);

        if position < self.shelf_categories.len() {
            let exact = self.shelf_categories[position].0 == category;
            if exact {
                let head = self.shelf_categories[position].1;
                let slot = self.find_slot(slot_width, head, true);
                if slot != INVALID_SLOT {
                    return slot;
                }
            }

            // Open a new shelf only when the category did not exist yet.
            if !exact {
                let new_shelf = self.try_allocate_shelf(allocated_height);
                if new_shelf != NIL {
                    self.shelf_categories.insert(position, (category, new_shelf));
                    let slot = self.find_slot(slot_width, new_shelf, false);
                    ke_assert!(slot != INVALID_SLOT, "fresh shelf has no free slot");
                    return slot;
                }
            }

            // Out of atlas: pack into a bigger category where possible.
            for index in position..self.shelf_categories.len() {
                let head = self.shelf_categories[index].1;
                let slot = self.find_slot(slot_width, head, false);
                if slot != INVALID_SLOT {
                    return slot;
                }
            }
        } else {
            // No shelf big enough yet.
            let new_shelf = self.try_allocate_shelf(allocated_height);
            if new_shelf != NIL {
                self.shelf_categories.push((category, new_shelf));
                let slot = self.find_slot(slot_width, new_shelf, false);
                ke_assert!(slot != INVALID_SLOT, "fresh shelf has no free slot");
                return slot;
            }
        }

        INVALID_SLOT
    }

    pub fn free(&mut self, slot: u32) {
        let slot_entry = self.slots[slot as usize];

        // Recycle the slot id; `shelf` doubles as the free-list link.
        self.slots[slot as usize].shelf = self.next_slot_index;
        self.next_slot_index = slot;

        let shelf_index = slot_entry.shelf;

        // Find the first free range at or after the released one.
        let mut following = self.shelves[shelf_index].first_free;
        while following != NIL && self.free_slots[following].start < slot_entry.start {
            following = self.free_slots[following].next;
        }

        let preceding = if following != NIL {
            self.free_slots[following].prev
        } else {
            // Released range goes at the tail; find the last node.
            let mut tail = self.shelves[shelf_index].first_free;
            while tail != NIL && self.free_slots[tail].next != NIL {
                tail = self.free_slots[tail].next;
            }
            tail
        };

        let merges_back = following != NIL
            && slot_entry.start + slot_entry.width == self.free_slots[following].start;
        let merges_front = preceding != NIL
            && self.free_slots[preceding].start + self.free_slots[preceding].width
                == slot_entry.start;

        match (merges_front, merges_back) {
            (true, true) => {
                // The released range fills the gap: collapse into the front
                // neighbour and drop the back one.
                let following_entry = self.free_slots[following];
                self.free_slots[preceding].width += slot_entry.width + following_entry.width;
                self.unlink_free_slot(shelf_index, following);
            }
            (true, false) => {
                self.free_slots[preceding].width += slot_entry.width;
            }
            (false, true) => {
                let entry = &mut self.free_slots[following];
                entry.start = slot_entry.start;
                entry.width += slot_entry.width;
            }
            (false, false) => {
                let node = self.free_slots.allocate();
                self.free_slots[node] = FreeSlotEntry {
                    start: slot_entry.start,
                    width: slot_entry.width,
                    next: following,
                    prev: preceding,
                };
                if preceding != NIL {
                    self.free_slots[preceding].next = node;
                } else {
                    self.shelves[shelf_index].first_free = node;
                }
                if following != NIL {
                    self.free_slots[following].prev = node;
                }
            }
        }

        // A shelf whose single free range spans the full width is empty:
        // hand its band back to the column.
        let first_free = self.shelves[shelf_index].first_free;
        if first_free != NIL
            && self.free_slots[first_free].next == NIL
            && self.free_slots[first_free].width >= self.shelf_width
        {
            self.release_shelf(shelf_index);
        }
    }

    // -----------------------------------------------------------------
    // Internals

    fn unlink_free_slot(&mut self, shelf_index: u32, node: u32) {
        let entry = self.free_slots[node];
        if entry.prev != NIL {
            self.free_slots[entry.prev].next = entry.next;
        } else {
            self.shelves[shelf_index].first_free = entry.next;
        }
        if entry.next != NIL {
            self.free_slots[entry.next].prev = entry.prev;
        }
        self.free_slots.free(node);
    }

    fn allocate_slot_id(&mut self) -> u32 {
        if self.next_slot_index == NIL {
            self.slots.push(SlotEntry::default());
            return (self.slots.len() - 1) as u32;
        }
        let index = self.next_slot_index;
        // `shelf` stores the next free index while the slot is free.
        self.next_slot_index = self.slots[index as usize].shelf;
        index
    }

    /// Walks the shelf chain starting at `shelf_index` looking for a free
    /// range of at least `width`. With `allocate_shelf_if_needed`, a new
    /// shelf of the same height is chained when the walk comes up empty.
    fn find_slot(&mut self, width: u32, shelf_index: u32, allocate_shelf_if_needed: bool) -> u32 {
        let mut current = shelf_index;
        while current != NIL {
            let mut free_index = self.shelves[current].first_free;
            while free_index != NIL {
                if self.free_slots[free_index].width >= width {
                    let slot = self.allocate_slot_id();
                    self.slots[slot as usize] = SlotEntry {
                        shelf: current,
                        start: self.free_slots[free_index].start,
                        width,
                    };
                    let entry = &mut self.free_slots[free_index];
                    entry.start += width;
                    entry.width -= width;
                    if entry.width == 0 {
                        self.unlink_free_slot(current, free_index);
                    }
                    return slot;
                }
                free_index = self.free_slots[free_index].next;
            }

            if allocate_shelf_if_needed && self.shelves[current].next == NIL {
                let height = self.shelves[current].size;
                let new_shelf = self.try_allocate_shelf(height);
                if new_shelf == NIL {
                    return INVALID_SLOT;
                }
                self.shelves[current].next = new_shelf;
                self.shelves[new_shelf].prev = current;
                // The fresh shelf starts with one full-width free range.
                current = new_shelf;
                continue;
            }

            current = self.shelves[current].next;
        }

        INVALID_SLOT
    }

    /// Carves a band of `height` from the first column with room, creating
    /// a shelf with a single full-width free range.
    fn try_allocate_shelf(&mut self, height: u32) -> u32 {
        let position = self
            .free_shelves
            .iter()
            .position(|entry| entry.size >= height);
        let position = match position {
            Some(position) => position,
            None => return NIL,
        };

        let start = self.free_shelves[position].start;
        self.free_shelves[position].start += height;
        self.free_shelves[position].size -= height;
        if self.free_shelves[position].size == 0 {
            self.free_shelves.remove(position);
        }

        let free_slot = self.free_slots.allocate();
        self.free_slots[free_slot] = FreeSlotEntry {
            start: 0,
            width: self.shelf_width,
            next: NIL,
            prev: NIL,
        };

        let shelf = self.shelves.allocate();
        self.shelves[shelf] = ShelfEntry {
            start,
            size: height,
            first_free: free_slot,
            next: NIL,
            prev: NIL,
        };
        shelf
    }

    /// Unlinks an empty shelf from its category chain and merges its band
    /// back into the sorted free-shelf list.
    fn release_shelf(&mut self, shelf_index: u32) {
        let shelf = self.shelves[shelf_index];

        if shelf.prev != NIL {
            self.shelves[shelf.prev].next = shelf.next;
        } else if let Some(position) = self
            .shelf_categories
            .iter()
            .position(|(_, head)| *head == shelf_index)
        {
            if shelf.next != NIL {
                self.shelf_categories[position].1 = shelf.next;
            } else {
                self.shelf_categories.remove(position);
            }
        }
        if shelf.next != NIL {
            self.shelves[shelf.next].prev = shelf.prev;
        }

        if shelf.first_free != NIL {
            self.free_slots.free(shelf.first_free);
        }
        self.shelves.free(shelf_index);

        self.merge_free_shelf(FreeShelfEntry {
            start: shelf.start,
            size: shelf.size,
        });
    }

    fn same_column(&self, a: u32, b: u32) -> bool {
        a / self.atlas_size.1 == b / self.atlas_size.1
    }

    fn merge_free_shelf(&mut self, freed: FreeShelfEntry) {
        let position = self
            .free_shelves
            .partition_point(|entry| entry.start < freed.start);

        let merges_back = position < self.free_shelves.len()
            && freed.start + freed.size == self.free_shelves[position].start
            && self.same_column(freed.start, self.free_shelves[position].start);
        let merges_front = position > 0 && {
            let prev = self.free_shelves[position - 1];
            prev.start + prev.size == freed.start && self.same_column(prev.start, freed.start)
        };

        match (merges_front, merges_back) {
            (true, true) => {
                let next_size = self.free_shelves[position].size;
                self.free_shelves[position - 1].size += freed.size + next_size;
                self.free_shelves.remove(position);
            }
            (true, false) => {
                self.free_shelves[position - 1].size += freed.size;
            }
            (false, true) => {
                let entry = &mut self.free_shelves[position];
                entry.start = freed.start;
                entry.size += freed.size;
            }
            (false, false) => {
                self.free_shelves.insert(position, freed);
            }
        }
    }
}
