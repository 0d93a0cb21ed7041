//! Cross-device transfer behavior on both backends

use assert_matches::assert_matches;
use carrack_core::{BackendPreference, CarrackError, DeviceId, ElementType, HostArray};
use carrack_testkit::strategies::arb_host_array;
use carrack_testkit::{assert_host_eq, TransferFixture};
use carrack_transfer::{AsyncHandle, BackendKind, Retained};
use proptest::prelude::*;

fn two_devices(backend: BackendPreference) -> TransferFixture {
    TransferFixture::builder()
        .devices(2)
        .backend(backend)
        .build()
        .unwrap()
}

fn patterned(dtype: ElementType, shape: &[usize]) -> HostArray {
    let n = shape.iter().product::<usize>() * dtype.size_bytes();
    let bytes = (0..n).map(|i| (i * 37 + 11) as u8).collect();
    HostArray::new(dtype, shape.to_vec(), bytes).unwrap()
}

async fn round_trip(fixture: &TransferFixture, host: &HostArray) -> HostArray {
    let engine = fixture.engine();
    let src = fixture.upload_host(DeviceId(0), host);
    let there = engine.transfer_to(&src, DeviceId(1)).unwrap();
    assert_eq!(there.device(), DeviceId(1));
    let back = engine.transfer_to(&there, DeviceId(0)).unwrap();
    assert_eq!(back.device(), DeviceId(0));
    assert!(!back.same_memory(&src));
    back.to_host().await.unwrap()
}

#[tokio::test]
async fn same_device_transfer_aliases_source() {
    for backend in [BackendPreference::Collective, BackendPreference::Local] {
        let fixture = two_devices(backend);
        let src = fixture.upload(DeviceId(0), &[3], &[1.0f32, 2.0, 3.0]);

        let out = fixture.engine().transfer_to(&src, DeviceId(0)).unwrap();

        assert!(out.same_memory(&src));
        assert_eq!(out.array().data_ptr(), src.array().data_ptr());
        assert!(out.ready().same_event(src.ready()));
        assert_eq!(fixture.engine().stats().fast_path, 1);
        assert_eq!(fixture.device(DeviceId(0)).pool().stats().allocations, 1);
    }
}

#[tokio::test]
async fn round_trip_preserves_contents_for_every_width() {
    let dtypes = [
        ElementType::Int8,
        ElementType::UInt8,
        ElementType::Float16,
        ElementType::Int32,
        ElementType::Float32,
        ElementType::Int64,
        ElementType::Float64,
        ElementType::Complex64,
        ElementType::Complex128,
    ];
    let shapes: [&[usize]; 6] = [&[], &[0], &[5], &[3, 4], &[2, 0, 3], &[2, 3, 4]];

    for backend in [BackendPreference::Collective, BackendPreference::Local] {
        let fixture = two_devices(backend);
        for dtype in dtypes {
            for shape in shapes {
                let host = patterned(dtype, shape);
                let back = round_trip(&fixture, &host).await;
                assert_host_eq(&back, &host);
            }
        }
    }
}

#[tokio::test]
async fn strided_source_arrives_contiguous() {
    for backend in [BackendPreference::Collective, BackendPreference::Local] {
        let fixture = two_devices(backend);
        let src = fixture.upload(DeviceId(0), &[2, 3], &[0i32, 1, 2, 3, 4, 5]);
        let transposed = AsyncHandle::completed(src.array().transposed());

        let moved = fixture
            .engine()
            .transfer_to(&transposed, DeviceId(1))
            .unwrap();

        assert!(moved.array().is_contiguous());
        let host = moved.to_host().await.unwrap();
        assert_eq!(host.shape(), &[3, 2]);
        assert_eq!(host.to_vec::<i32>().unwrap(), vec![0, 3, 1, 4, 2, 5]);
    }
}

#[tokio::test]
async fn collective_transfer_retains_source_and_staging_buffer() {
    let fixture = two_devices(BackendPreference::Collective);
    assert_eq!(fixture.registry().backend_kind(), BackendKind::Collective);
    let src = fixture.upload(DeviceId(0), &[4], &[1u32, 2, 3, 4]);

    let moved = fixture.engine().transfer_to(&src, DeviceId(1)).unwrap();

    assert_matches!(moved.retained(), [Retained::Handle(h), Retained::Array(_)] if h.same_memory(&src));
    moved.wait().await.unwrap();
    let compacted = moved.compact();
    assert!(compacted.retained().is_empty());
    assert!(compacted.same_memory(&moved));
}

#[tokio::test]
async fn local_copy_transfer_retains_source_array() {
    let fixture = two_devices(BackendPreference::Local);
    assert_eq!(fixture.registry().backend_kind(), BackendKind::LocalCopy);
    let src = fixture.upload(DeviceId(1), &[2], &[7i64, 8]);

    let moved = fixture.engine().transfer_to(&src, DeviceId(0)).unwrap();

    assert_matches!(moved.retained(), [Retained::Array(a)] if a.same_memory(src.array()));
    assert_eq!(moved.to_host().await.unwrap().to_vec::<i64>().unwrap(), vec![7, 8]);
}

#[tokio::test]
async fn out_of_memory_returns_no_handle() {
    for backend in [BackendPreference::Collective, BackendPreference::Local] {
        let fixture = TransferFixture::builder()
            .devices(2)
            .memory_per_device(1024)
            .backend(backend)
            .build()
            .unwrap();
        let src = fixture.upload(DeviceId(0), &[100], &[0.5f64; 100]);
        let _occupant = fixture
            .device(DeviceId(1))
            .empty(ElementType::UInt8, &[512])
            .unwrap();

        let result = fixture.engine().transfer_to(&src, DeviceId(1));

        assert_matches!(
            result,
            Err(CarrackError::OutOfMemory {
                device: DeviceId(1),
                requested: 800,
                available: 512,
            })
        );
        assert_eq!(fixture.engine().stats().failures, 1);
        assert_eq!(fixture.device(DeviceId(1)).pool().used_bytes(), 512);
    }
}

#[tokio::test]
async fn unwired_element_types_are_rejected_by_collective_backend() {
    let fixture = two_devices(BackendPreference::Collective);
    let src = fixture.upload(DeviceId(0), &[3], &[1i16, 2, 3]);
    assert_matches!(
        fixture.engine().transfer_to(&src, DeviceId(1)),
        Err(CarrackError::UnsupportedElementType {
            dtype: ElementType::Int16,
            ..
        })
    );

    // the degraded backend copies raw bytes and has no wire restriction
    let local = two_devices(BackendPreference::Local);
    let src = local.upload(DeviceId(0), &[3], &[true, false, true]);
    let moved = local.engine().transfer_to(&src, DeviceId(1)).unwrap();
    assert_eq!(
        moved.to_host().await.unwrap().to_vec::<bool>().unwrap(),
        vec![true, false, true]
    );
}

#[tokio::test]
async fn stats_count_bytes_moved() {
    let fixture = two_devices(BackendPreference::Collective);
    let src = fixture.upload(DeviceId(0), &[16], &[3u8; 16]);
    let engine = fixture.engine();

    let there = engine.transfer_to(&src, DeviceId(1)).unwrap();
    engine.transfer_to(&there, DeviceId(1)).unwrap();
    engine.transfer_to(&there, DeviceId(0)).unwrap();

    let stats = engine.stats();
    assert_eq!(stats.transfers, 3);
    assert_eq!(stats.fast_path, 1);
    assert_eq!(stats.bytes_moved, 32);
    assert_eq!(stats.failures, 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn backends_produce_identical_bytes(host in arb_host_array()) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let collective = two_devices(BackendPreference::Collective);
            let local = two_devices(BackendPreference::Local);
            let via_collective = round_trip(&collective, &host).await;
            let via_local = round_trip(&local, &host).await;
            assert_host_eq(&via_collective, &host);
            assert_host_eq(&via_local, &via_collective);
        });
    }
}
