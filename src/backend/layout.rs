use hashbrown::HashMap;

use crate::middle::lir::RegisterId;

pub fn align_to(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

/// Collects the `alloc_param`/`alloc_local` head of a function and assigns
/// every slot an offset from `rbp`
#[derive(Debug, Default)]
pub struct StackAllocator {
    params: Vec<(RegisterId, usize)>,
    locals: Vec<(RegisterId, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackLayout {
    pub frame_size: usize,
    offsets: HashMap<RegisterId, isize>,
}

impl StackAllocator {
    pub fn allocate_param(&mut self, register: RegisterId, size: usize) {
        self.params.push((register, size));
    }

    pub fn allocate_local(&mut self, register: RegisterId, size: usize) {
        self.locals.push((register, size));
    }

    pub fn finish(self) -> StackLayout {
        let mut offsets = HashMap::new();

        // Saved rbp at [rbp], return address at [rbp+8]. The last argument
        // was pushed last and sits right above them.
        let mut offset = 8;

        for (register, size) in self.params.into_iter().rev() {
            offset += align_to(size, 8);
            offsets.insert(register, offset as isize);
        }

        let mut frame_size = 0;

        for (register, size) in self.locals {
            frame_size += align_to(size, 8);
            offsets.insert(register, -(frame_size as isize));
        }

        StackLayout {
            frame_size,
            offsets,
        }
    }
}

impl StackLayout {
    pub fn offset(&self, slot: RegisterId) -> Option<isize> {
        self.offsets.get(&slot).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;

    #[test]
    fn first_parameter_has_the_highest_address() {
        let mut allocator = StackAllocator::default();
        allocator.allocate_param(RegisterId::new(0), 8);
        allocator.allocate_param(RegisterId::new(1), 8);
        allocator.allocate_param(RegisterId::new(2), 8);

        let layout = allocator.finish();

        assert_eq!(layout.offset(RegisterId::new(2)), Some(16));
        assert_eq!(layout.offset(RegisterId::new(1)), Some(24));
        assert_eq!(layout.offset(RegisterId::new(0)), Some(32));
        assert_eq!(layout.frame_size, 0);
    }

    #[test]
    fn locals_grow_downward_in_declaration_order() {
        let mut allocator = StackAllocator::default();
        allocator.allocate_param(RegisterId::new(0), 8);
        allocator.allocate_local(RegisterId::new(1), 8);
        allocator.allocate_local(RegisterId::new(2), 4);
        allocator.allocate_local(RegisterId::new(3), 8);

        let layout = allocator.finish();

        assert_eq!(layout.offset(RegisterId::new(1)), Some(-8));
        assert_eq!(layout.offset(RegisterId::new(2)), Some(-16));
        assert_eq!(layout.offset(RegisterId::new(3)), Some(-24));
        assert_eq!(layout.frame_size, 24);
        assert_eq!(layout.offset(RegisterId::new(9)), None);
    }
}
