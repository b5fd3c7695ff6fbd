use gpuwire_protocol::{
    AllocationFailure, BufferDescriptor, BufferUsages, Command, CommandSerializer, DecodeProgress,
    DeviceLostReason, Direction, ErrorFilter, ErrorType, LoggingType, MapAsyncStatus, MapMode,
    MemoryTransport, ObjectHandle, ObjectType, PopErrorScopeStatus, Resolution, ReturnCommand,
    StreamDecoder, WireError, WireLimits, WorkDoneStatus, BOOTSTRAP_DEVICE,
};
use gpuwire_server::{Backend, BackendError, BackendId, MemoryBackend, Server};

const DEVICE: ObjectHandle = BOOTSTRAP_DEVICE;

fn h(id: u32, generation: u32) -> ObjectHandle {
    ObjectHandle::new(id, generation)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Ret {
    Error(ObjectHandle, ErrorType, String),
    Lost(ObjectHandle, DeviceLostReason, String),
    Log(ObjectHandle, LoggingType, String),
    Map(ObjectHandle, u64, MapAsyncStatus, Vec<u8>),
    WorkDone(ObjectHandle, u64, WorkDoneStatus),
    Popped(u64, ErrorType, String),
}

impl From<ReturnCommand<'_>> for Ret {
    fn from(command: ReturnCommand<'_>) -> Self {
        match command {
            ReturnCommand::DeviceUncapturedError {
                device,
                error_type,
                message,
            } => Ret::Error(device, error_type, message.to_owned()),
            ReturnCommand::DeviceLost {
                device,
                reason,
                message,
            } => Ret::Lost(device, reason, message.to_owned()),
            ReturnCommand::DeviceLogging {
                device,
                level,
                message,
            } => Ret::Log(device, level, message.to_owned()),
            ReturnCommand::BufferMapAsyncCallback {
                buffer,
                request_serial,
                status,
                data,
            } => Ret::Map(buffer, request_serial, status, data.to_vec()),
            ReturnCommand::QueueWorkDoneCallback {
                queue,
                request_serial,
                status,
            } => Ret::WorkDone(queue, request_serial, status),
            ReturnCommand::DevicePopErrorScopeCallback {
                device,
                request_serial,
                status,
                error_type,
                message,
            } => {
                assert_eq!(device, DEVICE);
                assert_eq!(status, PopErrorScopeStatus::Success);
                Ret::Popped(request_serial, error_type, message.to_owned())
            }
        }
    }
}

fn server() -> (Server<MemoryBackend>, BackendId) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut backend = MemoryBackend::new();
    let device = backend.create_device();
    let server = Server::new(backend, device, WireLimits::default()).unwrap();
    (server, device)
}

fn send(server: &mut Server<MemoryBackend>, commands: &[Command<'_>]) -> Result<DecodeProgress, WireError> {
    let mut serializer = CommandSerializer::new(Direction::ClientToServer, WireLimits::default());
    for command in commands {
        serializer.serialize(command).unwrap();
    }
    let mut transport = MemoryTransport::new();
    serializer.flush(&mut transport).unwrap();
    server.handle_commands(&transport.take_stream())
}

fn returns(server: &mut Server<MemoryBackend>) -> Vec<Ret> {
    let mut transport = MemoryTransport::new();
    server.flush(&mut transport).unwrap();
    let mut decoder = StreamDecoder::new(WireLimits::default());
    let mut out = Vec::new();
    let progress = decoder
        .decode(&transport.take_stream(), |record| {
            out.push(Ret::from(ReturnCommand::decode(record)?));
            Ok(())
        })
        .unwrap();
    assert!(progress.is_complete());
    out
}

fn create_buffer(result: ObjectHandle, size: u64, usage: BufferUsages) -> Command<'static> {
    Command::DeviceCreateBuffer {
        device: DEVICE,
        result,
        desc: BufferDescriptor {
            size,
            usage,
            mapped_at_creation: false,
        },
    }
}

fn map(buffer: ObjectHandle, request_serial: u64, mode: MapMode, size: u64) -> Command<'static> {
    Command::BufferMapAsync {
        buffer,
        request_serial,
        mode,
        offset: 0,
        size,
    }
}

fn release(object_type: ObjectType, object: ObjectHandle) -> Command<'static> {
    Command::DestroyObject {
        object_type,
        object,
    }
}

fn push(filter: ErrorFilter) -> Command<'static> {
    Command::DevicePushErrorScope {
        device: DEVICE,
        filter,
    }
}

fn pop(request_serial: u64) -> Command<'static> {
    Command::DevicePopErrorScope {
        device: DEVICE,
        request_serial,
    }
}

fn inject(error_type: ErrorType, message: &str) -> Command<'_> {
    Command::DeviceInjectError {
        device: DEVICE,
        error_type,
        message,
    }
}

fn allocation_failure(err: WireError) -> AllocationFailure {
    match err {
        WireError::ObjectAllocation { reason, .. } => reason,
        other => panic!("expected an allocation failure, got {other:?}"),
    }
}

#[test]
fn create_commands_bind_backend_objects() {
    let (mut server, device) = server();
    assert_eq!(server.lookup_backend(ObjectType::Device, device), Some(DEVICE));

    send(
        &mut server,
        &[
            create_buffer(h(1, 1), 64, BufferUsages::COPY_DST),
            Command::DeviceGetQueue {
                device: DEVICE,
                result: h(1, 1),
            },
            Command::DeviceCreateShaderModule {
                device: DEVICE,
                result: h(1, 1),
                code: "@compute @workgroup_size(1) fn main() {}",
            },
        ],
    )
    .unwrap();

    for object_type in [ObjectType::Buffer, ObjectType::Queue, ObjectType::ShaderModule] {
        assert_eq!(server.resolve(object_type, h(1, 1)), Resolution::Valid);
        let backend = server.backend_id(object_type, h(1, 1)).unwrap();
        assert_eq!(server.lookup_backend(object_type, backend), Some(h(1, 1)));
    }
    assert_eq!(server.backend().live_objects(), 3);
    assert!(returns(&mut server).is_empty());
}

#[test]
fn stale_references_are_noops() {
    let (mut server, _) = server();
    send(
        &mut server,
        &[
            create_buffer(h(1, 1), 16, BufferUsages::MAP_READ | BufferUsages::COPY_DST),
            Command::DeviceGetQueue {
                device: DEVICE,
                result: h(1, 1),
            },
            release(ObjectType::Buffer, h(1, 1)),
        ],
    )
    .unwrap();

    send(
        &mut server,
        &[
            map(h(1, 1), 1, MapMode::Read, 16),
            Command::QueueWriteBuffer {
                queue: h(1, 1),
                buffer: h(1, 1),
                offset: 0,
                data: &[1, 2, 3, 4],
            },
            Command::BufferUnmap { buffer: h(1, 1) },
            Command::BufferDestroy { buffer: h(1, 2) },
            release(ObjectType::Buffer, h(1, 1)),
            release(ObjectType::Texture, h(7, 3)),
        ],
    )
    .unwrap();

    assert!(!server.is_corrupted());
    assert_eq!(server.pending_completions(), 0);
    assert_eq!(server.tick().unwrap(), 0);
    assert!(returns(&mut server).is_empty());
}

#[test]
fn backend_failure_creates_an_error_object_and_reports_it() {
    let (mut server, _) = server();
    server
        .backend_mut()
        .fail_next(BackendError::validation("bad descriptor"));
    send(
        &mut server,
        &[create_buffer(h(1, 1), 16, BufferUsages::MAP_READ)],
    )
    .unwrap();
    assert_eq!(server.resolve(ObjectType::Buffer, h(1, 1)), Resolution::ErrorObject);
    assert_eq!(server.backend_id(ObjectType::Buffer, h(1, 1)), None);

    // Async requests on an error object still answer.
    send(&mut server, &[map(h(1, 1), 1, MapMode::Read, 16)]).unwrap();
    assert_eq!(
        returns(&mut server),
        vec![
            Ret::Error(DEVICE, ErrorType::Validation, "bad descriptor".into()),
            Ret::Map(h(1, 1), 1, MapAsyncStatus::ValidationError, Vec::new()),
        ]
    );
    assert_eq!(server.pending_completions(), 0);

    // An error object can be released like any other.
    send(&mut server, &[release(ObjectType::Buffer, h(1, 1))]).unwrap();
    assert_eq!(server.resolve(ObjectType::Buffer, h(1, 1)), Resolution::Stale);
    assert!(server.backend().released().is_empty());
}

#[test]
fn error_inputs_propagate_to_created_objects() {
    let (mut server, _) = server();
    // A stale device makes the result an error object without an error report.
    send(
        &mut server,
        &[Command::DeviceGetQueue {
            device: h(1, 2),
            result: h(1, 1),
        }],
    )
    .unwrap();
    assert_eq!(server.resolve(ObjectType::Queue, h(1, 1)), Resolution::ErrorObject);

    send(
        &mut server,
        &[
            create_buffer(h(1, 1), 8, BufferUsages::COPY_DST),
            Command::QueueWriteBuffer {
                queue: h(1, 1),
                buffer: h(1, 1),
                offset: 0,
                data: &[9; 8],
            },
            Command::QueueOnSubmittedWorkDone {
                queue: h(1, 1),
                request_serial: 4,
            },
        ],
    )
    .unwrap();

    let buffer = server.backend_id(ObjectType::Buffer, h(1, 1)).unwrap();
    assert_eq!(server.backend().buffer_contents(buffer), Some(&[0u8; 8][..]));
    assert_eq!(
        returns(&mut server),
        vec![Ret::WorkDone(h(1, 1), 4, WorkDoneStatus::Error)]
    );
}

#[test]
fn live_ids_cannot_be_recreated() {
    let (mut server, _) = server();
    let err = send(
        &mut server,
        &[
            create_buffer(h(1, 1), 8, BufferUsages::COPY_DST),
            create_buffer(h(1, 2), 8, BufferUsages::COPY_DST),
        ],
    )
    .unwrap_err();
    assert_eq!(allocation_failure(err), AllocationFailure::AlreadyLive);
    assert!(server.is_corrupted());
    assert_eq!(
        send(&mut server, &[create_buffer(h(2, 1), 8, BufferUsages::COPY_DST)]),
        Err(WireError::StreamCorrupted)
    );
    assert_eq!(server.tick(), Err(WireError::StreamCorrupted));
}

#[test]
fn ids_must_be_dense_and_generations_must_advance() {
    let (mut server, _) = server();
    let err = send(&mut server, &[create_buffer(h(3, 1), 8, BufferUsages::COPY_DST)]).unwrap_err();
    assert_eq!(allocation_failure(err), AllocationFailure::IdOutOfRange);

    let (mut server, _) = self::server();
    let err = send(
        &mut server,
        &[
            create_buffer(h(1, 1), 8, BufferUsages::COPY_DST),
            release(ObjectType::Buffer, h(1, 1)),
            create_buffer(h(1, 1), 8, BufferUsages::COPY_DST),
        ],
    )
    .unwrap_err();
    assert_eq!(allocation_failure(err), AllocationFailure::StaleGeneration);

    let (mut server, _) = self::server();
    send(
        &mut server,
        &[
            create_buffer(h(1, 1), 8, BufferUsages::COPY_DST),
            release(ObjectType::Buffer, h(1, 1)),
            create_buffer(h(1, 2), 8, BufferUsages::COPY_DST),
        ],
    )
    .unwrap();
    assert_eq!(server.resolve(ObjectType::Buffer, h(1, 2)), Resolution::Valid);
    assert_eq!(server.resolve(ObjectType::Buffer, h(1, 1)), Resolution::Stale);
}

#[test]
fn null_handles_are_fatal() {
    let (mut server, _) = server();
    let err = send(&mut server, &[release(ObjectType::Buffer, ObjectHandle::NULL)]).unwrap_err();
    assert!(matches!(
        err,
        WireError::NullHandle {
            object_type: ObjectType::Buffer,
            ..
        }
    ));
}

#[test]
fn read_map_completes_once_its_serial_completes() {
    let (mut server, _) = server();
    send(
        &mut server,
        &[
            create_buffer(h(1, 1), 8, BufferUsages::MAP_READ | BufferUsages::COPY_DST),
            Command::DeviceGetQueue {
                device: DEVICE,
                result: h(1, 1),
            },
            Command::QueueWriteBuffer {
                queue: h(1, 1),
                buffer: h(1, 1),
                offset: 2,
                data: &[1, 2, 3, 4],
            },
        ],
    )
    .unwrap();
    server.backend_mut().submit();

    send(
        &mut server,
        &[
            map(h(1, 1), 1, MapMode::Read, 8),
            Command::QueueOnSubmittedWorkDone {
                queue: h(1, 1),
                request_serial: 1,
            },
        ],
    )
    .unwrap();
    assert_eq!(server.pending_completions(), 2);
    assert_eq!(server.tick().unwrap(), 0);
    assert!(returns(&mut server).is_empty());

    server.backend_mut().complete_all();
    assert_eq!(server.tick().unwrap(), 2);
    assert_eq!(server.pending_completions(), 0);
    assert_eq!(
        returns(&mut server),
        vec![
            Ret::Map(h(1, 1), 1, MapAsyncStatus::Success, vec![0, 0, 1, 2, 3, 4, 0, 0]),
            Ret::WorkDone(h(1, 1), 1, WorkDoneStatus::Success),
        ]
    );
}

#[test]
fn invalid_maps_fail_immediately() {
    let (mut server, _) = server();
    send(
        &mut server,
        &[
            create_buffer(h(1, 1), 8, BufferUsages::MAP_WRITE),
            map(h(1, 1), 1, MapMode::Read, 8),
            map(h(1, 1), 2, MapMode::Write, 16),
            map(h(1, 1), 3, MapMode::Write, 8),
            map(h(1, 1), 4, MapMode::Write, 8),
        ],
    )
    .unwrap();
    assert_eq!(server.tick().unwrap(), 1);
    assert_eq!(
        returns(&mut server),
        vec![
            Ret::Map(h(1, 1), 1, MapAsyncStatus::ValidationError, Vec::new()),
            Ret::Map(h(1, 1), 2, MapAsyncStatus::ValidationError, Vec::new()),
            Ret::Map(h(1, 1), 4, MapAsyncStatus::ValidationError, Vec::new()),
            Ret::Map(h(1, 1), 3, MapAsyncStatus::Success, Vec::new()),
        ]
    );
}

#[test]
fn unmap_and_destroy_complete_pending_maps_with_teardown_status() {
    let (mut server, _) = server();
    send(
        &mut server,
        &[
            create_buffer(h(1, 1), 8, BufferUsages::MAP_WRITE),
            create_buffer(h(2, 1), 8, BufferUsages::MAP_READ),
        ],
    )
    .unwrap();
    server.backend_mut().submit();
    send(
        &mut server,
        &[
            map(h(1, 1), 1, MapMode::Write, 8),
            map(h(2, 1), 1, MapMode::Read, 8),
            Command::BufferUnmap { buffer: h(1, 1) },
            Command::BufferDestroy { buffer: h(2, 1) },
        ],
    )
    .unwrap();

    let first = server.backend_id(ObjectType::Buffer, h(1, 1)).unwrap();
    assert!(!server.backend().is_buffer_mapped(first));

    server.backend_mut().complete_all();
    server.tick().unwrap();
    assert_eq!(
        returns(&mut server),
        vec![
            Ret::Map(h(1, 1), 1, MapAsyncStatus::UnmappedBeforeCallback, Vec::new()),
            Ret::Map(h(2, 1), 1, MapAsyncStatus::DestroyedBeforeCallback, Vec::new()),
        ]
    );
}

#[test]
fn maps_of_released_buffers_are_dropped() {
    let (mut server, _) = server();
    send(&mut server, &[create_buffer(h(1, 1), 8, BufferUsages::MAP_READ)]).unwrap();
    server.backend_mut().submit();
    send(
        &mut server,
        &[
            map(h(1, 1), 1, MapMode::Read, 8),
            release(ObjectType::Buffer, h(1, 1)),
        ],
    )
    .unwrap();
    server.backend_mut().complete_all();
    assert_eq!(server.tick().unwrap(), 0);
}

#[test]
fn updates_must_stay_inside_the_write_mapping() {
    let (mut server, _) = server();
    send(
        &mut server,
        &[
            Command::DeviceCreateBuffer {
                device: DEVICE,
                result: h(1, 1),
                desc: BufferDescriptor {
                    size: 8,
                    usage: BufferUsages::MAP_WRITE,
                    mapped_at_creation: true,
                },
            },
            Command::BufferUpdateMappedData {
                buffer: h(1, 1),
                offset: 0,
                data: &[5, 6, 7, 8, 9, 10, 11, 12],
            },
        ],
    )
    .unwrap();
    let buffer = server.backend_id(ObjectType::Buffer, h(1, 1)).unwrap();
    assert_eq!(
        server.backend().buffer_contents(buffer),
        Some(&[5u8, 6, 7, 8, 9, 10, 11, 12][..])
    );

    let err = send(
        &mut server,
        &[Command::BufferUpdateMappedData {
            buffer: h(1, 1),
            offset: 4,
            data: &[0; 8],
        }],
    )
    .unwrap_err();
    assert!(matches!(
        err,
        WireError::Protocol {
            command: "BufferUpdateMappedData",
            ..
        }
    ));
}

#[test]
fn updates_without_a_write_mapping_are_fatal() {
    let (mut server, _) = server();
    let err = send(
        &mut server,
        &[
            create_buffer(h(1, 1), 8, BufferUsages::MAP_WRITE),
            Command::BufferUpdateMappedData {
                buffer: h(1, 1),
                offset: 0,
                data: &[1],
            },
        ],
    )
    .unwrap_err();
    assert!(matches!(err, WireError::Protocol { .. }));
}

#[test]
fn release_frees_the_slot_and_the_backend_object() {
    let (mut server, _) = server();
    send(&mut server, &[create_buffer(h(1, 1), 8, BufferUsages::COPY_DST)]).unwrap();
    let buffer = server.backend_id(ObjectType::Buffer, h(1, 1)).unwrap();

    send(&mut server, &[release(ObjectType::Buffer, h(1, 1))]).unwrap();
    assert_eq!(server.resolve(ObjectType::Buffer, h(1, 1)), Resolution::Stale);
    assert_eq!(server.lookup_backend(ObjectType::Buffer, buffer), None);
    assert_eq!(server.backend().released(), &[(ObjectType::Buffer, buffer)]);
    assert_eq!(server.backend().live_objects(), 0);
}

#[test]
fn backend_events_reach_the_client_through_reverse_ids() {
    let (mut server, device) = server();
    server
        .backend_mut()
        .log(device, LoggingType::Info, "adapter ready");
    server
        .backend_mut()
        .log(BackendId(999), LoggingType::Warning, "nobody listens");
    server
        .backend_mut()
        .raise_error(device, ErrorType::OutOfMemory, "heap exhausted");
    send(&mut server, &[Command::DeviceDestroy { device: DEVICE }]).unwrap();

    assert_eq!(server.tick().unwrap(), 3);
    assert_eq!(
        returns(&mut server),
        vec![
            Ret::Log(DEVICE, LoggingType::Info, "adapter ready".into()),
            Ret::Error(DEVICE, ErrorType::OutOfMemory, "heap exhausted".into()),
            Ret::Lost(DEVICE, DeviceLostReason::Destroyed, "device destroyed".into()),
        ]
    );

    // Creates on a lost device fail and are reported.
    send(&mut server, &[create_buffer(h(1, 1), 8, BufferUsages::COPY_DST)]).unwrap();
    assert_eq!(server.resolve(ObjectType::Buffer, h(1, 1)), Resolution::ErrorObject);
    assert_eq!(
        returns(&mut server),
        vec![Ret::Error(DEVICE, ErrorType::DeviceLost, "device is lost".into())]
    );
}

#[test]
fn injected_errors_are_reported_in_command_order() {
    let (mut server, _) = server();
    send(
        &mut server,
        &[
            inject(ErrorType::Internal, "first"),
            create_buffer(h(1, 1), 8, BufferUsages::MAP_READ | BufferUsages::MAP_WRITE),
            inject(ErrorType::DeviceLost, "not injectable"),
        ],
    )
    .unwrap();
    assert_eq!(
        returns(&mut server),
        vec![
            Ret::Error(DEVICE, ErrorType::Internal, "first".into()),
            Ret::Error(
                DEVICE,
                ErrorType::Validation,
                "MAP_READ and MAP_WRITE cannot be combined".into()
            ),
            Ret::Error(
                DEVICE,
                ErrorType::Validation,
                "cannot inject an error of type DeviceLost".into()
            ),
        ]
    );
}

#[test]
fn error_scopes_capture_matching_errors() {
    let (mut server, _) = server();
    send(
        &mut server,
        &[
            push(ErrorFilter::Validation),
            push(ErrorFilter::OutOfMemory),
            inject(ErrorType::Validation, "outer first"),
            inject(ErrorType::Validation, "outer second"),
            inject(ErrorType::Internal, "nobody filters internal"),
            pop(1),
            pop(2),
            pop(3),
        ],
    )
    .unwrap();
    assert_eq!(
        returns(&mut server),
        vec![
            Ret::Error(DEVICE, ErrorType::Internal, "nobody filters internal".into()),
            Ret::Popped(1, ErrorType::NoError, String::new()),
            Ret::Popped(2, ErrorType::Validation, "outer first".into()),
            Ret::Popped(3, ErrorType::Unknown, "No error scopes to pop".into()),
        ]
    );
}

#[test]
fn innermost_matching_scope_wins() {
    let (mut server, _) = server();
    send(
        &mut server,
        &[
            push(ErrorFilter::Validation),
            push(ErrorFilter::Validation),
            create_buffer(h(1, 1), 8, BufferUsages::MAP_READ | BufferUsages::MAP_WRITE),
            pop(1),
            inject(ErrorType::Validation, "after inner pop"),
            pop(2),
        ],
    )
    .unwrap();
    assert_eq!(server.resolve(ObjectType::Buffer, h(1, 1)), Resolution::ErrorObject);
    assert_eq!(
        returns(&mut server),
        vec![
            Ret::Popped(
                1,
                ErrorType::Validation,
                "MAP_READ and MAP_WRITE cannot be combined".into()
            ),
            Ret::Popped(2, ErrorType::Validation, "after inner pop".into()),
        ]
    );
}

#[test]
fn backend_errors_pass_through_scopes_on_tick() {
    let (mut server, device) = server();
    send(&mut server, &[push(ErrorFilter::OutOfMemory)]).unwrap();
    server
        .backend_mut()
        .raise_error(device, ErrorType::OutOfMemory, "heap exhausted");
    server
        .backend_mut()
        .raise_error(device, ErrorType::Validation, "bad state");
    assert_eq!(server.tick().unwrap(), 1);
    send(&mut server, &[pop(7)]).unwrap();
    assert_eq!(
        returns(&mut server),
        vec![
            Ret::Error(DEVICE, ErrorType::Validation, "bad state".into()),
            Ret::Popped(7, ErrorType::OutOfMemory, "heap exhausted".into()),
        ]
    );
}

#[test]
fn popping_on_a_lost_device_reports_the_loss() {
    let (mut server, _) = server();
    send(
        &mut server,
        &[
            push(ErrorFilter::Internal),
            Command::DeviceDestroy { device: DEVICE },
            pop(1),
            pop(2),
        ],
    )
    .unwrap();
    assert_eq!(
        returns(&mut server),
        vec![
            Ret::Popped(1, ErrorType::DeviceLost, "GPU device disconnected".into()),
            Ret::Popped(2, ErrorType::DeviceLost, "GPU device disconnected".into()),
        ]
    );
}

#[test]
fn malformed_streams_corrupt_the_session() {
    let (mut server, _) = server();
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0x77u32.to_ne_bytes());
    bytes.extend_from_slice(&8u32.to_ne_bytes());
    assert_eq!(
        server.handle_commands(&bytes),
        Err(WireError::UnknownCommand { id: 0x77 })
    );
    assert_eq!(server.finish(), Err(WireError::StreamCorrupted));
    let mut transport = MemoryTransport::new();
    assert_eq!(server.flush(&mut transport), Err(WireError::StreamCorrupted));
}

#[test]
fn partial_records_wait_for_more_bytes() {
    let (mut server, _) = server();
    let mut serializer = CommandSerializer::new(Direction::ClientToServer, WireLimits::default());
    serializer
        .serialize(&create_buffer(h(1, 1), 8, BufferUsages::COPY_DST))
        .unwrap();
    let mut transport = MemoryTransport::new();
    serializer.flush(&mut transport).unwrap();
    let bytes = transport.take_stream();

    let (head, tail) = bytes.split_at(13);
    assert_eq!(
        server.handle_commands(head).unwrap(),
        DecodeProgress::Incomplete { buffered: 13 }
    );
    assert_eq!(server.resolve(ObjectType::Buffer, h(1, 1)), Resolution::Stale);
    assert!(matches!(
        server.handle_commands(tail).unwrap(),
        DecodeProgress::Complete
    ));
    assert_eq!(server.resolve(ObjectType::Buffer, h(1, 1)), Resolution::Valid);
    server.finish().unwrap();
}

#[test]
fn truncated_stream_is_fatal_at_finish() {
    let (mut server, _) = server();
    server.handle_commands(&[1, 0, 0, 0]).unwrap();
    assert_eq!(server.finish(), Err(WireError::TruncatedStream { buffered: 4 }));
    assert!(server.is_corrupted());
}

#[test]
fn servers_are_generic_over_the_backend() {
    fn bootstrap<B: Backend>(backend: B, device: BackendId) -> Server<B> {
        Server::new(backend, device, WireLimits::default()).unwrap()
    }
    let mut backend = MemoryBackend::new();
    let device = backend.create_device();
    let server = bootstrap(backend, device);
    assert_eq!(server.resolve(ObjectType::Device, DEVICE), Resolution::Valid);
}
