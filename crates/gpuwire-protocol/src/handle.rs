use std::fmt;

use bytemuck::{Pod, Zeroable};

/// Slot index in an object table. Id 0 is the null object.
pub type ObjectId = u32;

/// Wire reference to an object: `{id, generation}`.
///
/// A handle is only valid while `generation` equals the generation of slot `id`.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct ObjectHandle {
    pub id: ObjectId,
    pub generation: u32,
}

impl ObjectHandle {
    pub const NULL: ObjectHandle = ObjectHandle {
        id: 0,
        generation: 0,
    };

    pub const fn new(id: ObjectId, generation: u32) -> Self {
        Self { id, generation }
    }

    pub fn is_null(&self) -> bool {
        self.id == 0
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.generation)
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.generation)
    }
}

/// The device both ends create implicitly when a session starts.
pub const BOOTSTRAP_DEVICE: ObjectHandle = ObjectHandle::new(1, 1);

wire_enum! {
    /// Kind of object a handle refers to. Each kind has its own id space.
    pub enum ObjectType ("object_type") {
        Device = 0,
        Buffer = 1,
        Texture = 2,
        ShaderModule = 3,
        Queue = 4,
    }
}

impl ObjectType {
    pub const ALL: [ObjectType; 5] = [
        ObjectType::Device,
        ObjectType::Buffer,
        ObjectType::Texture,
        ObjectType::ShaderModule,
        ObjectType::Queue,
    ];
}
