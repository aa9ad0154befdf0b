use spirv::Word;

/// Hands out result ids. Ids start at 1 and are never reused.
#[derive(Debug)]
pub struct IdAllocator {
    next: Word,
}

impl Default for IdAllocator {
    fn default() -> Self {
        IdAllocator { next: 1 }
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> Word {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Reserves `n` contiguous ids and returns the first.
    pub fn reserve(&mut self, n: u32) -> Word {
        let first = self.next;
        self.next += n;
        first
    }

    /// The id the next allocation will return.
    pub fn peek(&self) -> Word {
        self.next
    }

    /// Header bound: one past the largest id handed out.
    pub fn bound(&self) -> Word {
        self.next
    }
}
