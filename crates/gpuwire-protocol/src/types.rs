use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BufferUsages: u32 {
        const MAP_READ = 1 << 0;
        const MAP_WRITE = 1 << 1;
        const COPY_SRC = 1 << 2;
        const COPY_DST = 1 << 3;
        const INDEX = 1 << 4;
        const VERTEX = 1 << 5;
        const UNIFORM = 1 << 6;
        const STORAGE = 1 << 7;
        const INDIRECT = 1 << 8;
        const QUERY_RESOLVE = 1 << 9;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TextureUsages: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const TEXTURE_BINDING = 1 << 2;
        const STORAGE_BINDING = 1 << 3;
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

wire_enum! {
    pub enum MapMode ("mode") {
        Read = 1,
        Write = 2,
    }
}

wire_enum! {
    pub enum TextureFormat ("format") {
        R8Unorm = 1,
        Rgba8Unorm = 2,
        Rgba8UnormSrgb = 3,
        Bgra8Unorm = 4,
        Rgba16Float = 5,
        Rgba32Float = 6,
        Depth24PlusStencil8 = 7,
        Depth32Float = 8,
    }
}

wire_enum! {
    /// Category of a device error. `NoError` only appears in error scope results.
    pub enum ErrorType ("error_type") {
        NoError = 0,
        Validation = 1,
        OutOfMemory = 2,
        Internal = 3,
        Unknown = 4,
        DeviceLost = 5,
    }
}

wire_enum! {
    /// Which errors an error scope captures.
    pub enum ErrorFilter ("filter") {
        Validation = 0,
        OutOfMemory = 1,
        Internal = 2,
    }
}

impl ErrorFilter {
    pub fn matches(self, error_type: ErrorType) -> bool {
        matches!(
            (self, error_type),
            (ErrorFilter::Validation, ErrorType::Validation)
                | (ErrorFilter::OutOfMemory, ErrorType::OutOfMemory)
                | (ErrorFilter::Internal, ErrorType::Internal)
        )
    }
}

wire_enum! {
    /// `Unknown` means the scope result never arrived: the device or the connection went away.
    pub enum PopErrorScopeStatus ("status") {
        Success = 0,
        Unknown = 1,
    }
}

wire_enum! {
    pub enum DeviceLostReason ("reason") {
        Unknown = 0,
        Destroyed = 1,
    }
}

wire_enum! {
    pub enum LoggingType ("level") {
        Verbose = 0,
        Info = 1,
        Warning = 2,
        Error = 3,
    }
}

wire_enum! {
    /// Outcome of a buffer map request.
    ///
    /// `Unknown`, `DestroyedBeforeCallback` and `UnmappedBeforeCallback` report teardown on the
    /// client side rather than a failure of the map itself.
    pub enum MapAsyncStatus ("status") {
        Success = 0,
        ValidationError = 1,
        Unknown = 2,
        DeviceLost = 3,
        DestroyedBeforeCallback = 4,
        UnmappedBeforeCallback = 5,
    }
}

wire_enum! {
    pub enum WorkDoneStatus ("status") {
        Success = 0,
        Error = 1,
        Unknown = 2,
        DeviceLost = 3,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub size: u64,
    pub usage: BufferUsages,
    pub mapped_at_creation: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub size: Extent3d,
    pub mip_level_count: u32,
    pub format: TextureFormat,
    pub usage: TextureUsages,
}
