//! Task stack page arena.
//!
//! A fixed memory region is carved into equal pages of
//! [`TASK_STACK_SIZE`](crate::config::TASK_STACK_SIZE) bytes. The first
//! word of each page holds its use flag; a page is free iff the flag lacks
//! the `USED` bit. Stacks grow downward from the top of their page.

use crate::config::{HW_FRAME_WORDS, INITIAL_XPSR, SW_FRAME_WORDS, TASK_STACK_SIZE};
use bitflags::bitflags;

bitflags! {
    /// Use flag stored in the first word of each page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// The page backs a live task stack.
        const USED = 1 << 0;
    }
}

/// The stack page arena over a caller-supplied region.
pub struct StackArena {
    region: &'static mut [u8],
    page_count: usize,
}

impl StackArena {
    /// Carves `region` into stack pages and zeroes every use flag.
    ///
    /// The region's length is rounded down to a whole number of pages; on
    /// the target it comes from the linker script, in tests from a leaked
    /// buffer.
    #[must_use]
    pub fn new(region: &'static mut [u8]) -> Self {
        let page_count = region.len() / TASK_STACK_SIZE;
        let mut arena = Self { region, page_count };
        for page in 0..page_count {
            arena.write_flags(page, PageFlags::empty());
        }
        arena
    }

    /// Number of pages in the arena.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    fn flags(&self, page: usize) -> PageFlags {
        let base = page * TASK_STACK_SIZE;
        let word = u32::from_le_bytes(self.region[base..base + 4].try_into().unwrap_or([0; 4]));
        PageFlags::from_bits_truncate(word)
    }

    fn write_flags(&mut self, page: usize, flags: PageFlags) {
        let base = page * TASK_STACK_SIZE;
        self.region[base..base + 4].copy_from_slice(&flags.bits().to_le_bytes());
    }

    /// Whether the given page currently backs a task stack.
    #[must_use]
    pub fn is_used(&self, page: usize) -> bool {
        page < self.page_count && self.flags(page).contains(PageFlags::USED)
    }

    /// Claims the first free page, or `None` if all are in use.
    pub fn alloc_page(&mut self) -> Option<usize> {
        let page = (0..self.page_count).find(|&p| !self.flags(p).contains(PageFlags::USED))?;
        self.write_flags(page, PageFlags::USED);
        Some(page)
    }

    /// Returns a page to the arena.
    pub fn free_page(&mut self, page: usize) {
        if page < self.page_count {
            self.write_flags(page, PageFlags::empty());
        }
    }

    /// Address one past the top of the page, where its stack starts.
    #[must_use]
    pub fn page_top(&self, page: usize) -> usize {
        self.region.as_ptr() as usize + (page + 1) * TASK_STACK_SIZE
    }

    fn write_word(&mut self, addr: usize, value: u32) {
        let offset = addr - self.region.as_ptr() as usize;
        self.region[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Reads the word at an address inside the arena. Used by frame tests
    /// and diagnostics.
    #[must_use]
    pub fn read_word(&self, addr: usize) -> u32 {
        let offset = addr - self.region.as_ptr() as usize;
        u32::from_le_bytes(self.region[offset..offset + 4].try_into().unwrap_or([0; 4]))
    }

    /// Crafts the initial stack frames for a fresh task on `page` and
    /// returns the resulting stack pointer.
    ///
    /// At the top of the page sits the hardware exception frame
    /// `{r0 = arg, r1-r3, r12, lr = exit, pc = entry, xPSR}`; below it the
    /// software-saved frame (r4-r11, zeroed) that the context-switch
    /// handler pops before returning to thread mode.
    pub fn craft_initial_frame(
        &mut self,
        page: usize,
        entry: usize,
        exit: usize,
        arg: usize,
    ) -> usize {
        let top = self.page_top(page);
        let hw_frame = top - 4 * HW_FRAME_WORDS;

        let words = [
            arg as u32,   // r0
            0,            // r1
            0,            // r2
            0,            // r3
            0,            // r12
            exit as u32,  // lr
            entry as u32, // pc
            INITIAL_XPSR, // xPSR
        ];
        for (i, word) in words.iter().enumerate() {
            self.write_word(hw_frame + 4 * i, *word);
        }

        let sp = hw_frame - 4 * SW_FRAME_WORDS;
        for i in 0..SW_FRAME_WORDS {
            self.write_word(sp + 4 * i, 0);
        }
        sp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_arena(pages: usize) -> StackArena {
        let region = vec![0xFFu8; pages * TASK_STACK_SIZE];
        StackArena::new(Vec::leak(region))
    }

    #[test]
    fn new_zeroes_flags() {
        let arena = make_arena(3);
        assert_eq!(arena.page_count(), 3);
        for page in 0..3 {
            assert!(!arena.is_used(page));
        }
    }

    #[test]
    fn alloc_scans_first_free() {
        let mut arena = make_arena(3);
        assert_eq!(arena.alloc_page(), Some(0));
        assert_eq!(arena.alloc_page(), Some(1));
        arena.free_page(0);
        // The freed page is reused before untouched ones.
        assert_eq!(arena.alloc_page(), Some(0));
        assert_eq!(arena.alloc_page(), Some(2));
        assert_eq!(arena.alloc_page(), None);
    }

    #[test]
    fn frame_layout() {
        let mut arena = make_arena(1);
        let page = arena.alloc_page().unwrap();
        let sp = arena.craft_initial_frame(page, 0x1000_0001, 0x2000_0001, 42);

        let top = arena.page_top(page);
        assert_eq!(sp, top - 4 * (HW_FRAME_WORDS + SW_FRAME_WORDS));

        let hw_frame = top - 4 * HW_FRAME_WORDS;
        assert_eq!(arena.read_word(hw_frame), 42); // r0
        assert_eq!(arena.read_word(hw_frame + 4), 0); // r1
        assert_eq!(arena.read_word(hw_frame + 20), 0x2000_0001); // lr
        assert_eq!(arena.read_word(hw_frame + 24), 0x1000_0001); // pc
        assert_eq!(arena.read_word(hw_frame + 28), INITIAL_XPSR); // xPSR

        // The software frame below is zeroed.
        for i in 0..SW_FRAME_WORDS {
            assert_eq!(arena.read_word(sp + 4 * i), 0);
        }
    }

    #[test]
    fn partial_page_is_ignored() {
        let region = vec![0u8; TASK_STACK_SIZE + TASK_STACK_SIZE / 2];
        let arena = StackArena::new(Vec::leak(region));
        assert_eq!(arena.page_count(), 1);
    }
}
