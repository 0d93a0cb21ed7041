//! Exporting transferred buffers to external consumers

use assert_matches::assert_matches;
use carrack_core::{CarrackError, DeviceId, ElementType};
use carrack_effects::capsule::{CAPSULE_NAME, USED_CAPSULE_NAME};
use carrack_effects::DeviceArray;
use carrack_testkit::{delayed_fill, TransferFixture};
use std::time::Duration;

#[tokio::test]
async fn capsule_is_single_use() {
    let fixture = TransferFixture::new(1);
    let src = fixture.upload(DeviceId(0), &[2, 2], &[1.5f32, 2.5, 3.5, 4.5]);
    let capsule = src.export(fixture.device(DeviceId(0)).default_stream()).unwrap();

    assert_eq!(capsule.name(), CAPSULE_NAME);
    assert_eq!(capsule.dtype(), ElementType::Float32);
    assert_eq!(capsule.shape(), &[2, 2]);
    assert_eq!(capsule.device(), DeviceId(0));

    let imported = DeviceArray::from_capsule(&capsule).unwrap();
    assert!(imported.same_memory(src.array()));
    assert_eq!(capsule.name(), USED_CAPSULE_NAME);

    let again = DeviceArray::from_capsule(&capsule);
    assert_matches!(
        again,
        Err(CarrackError::OwnershipViolation { message }) if message.contains("consumed multiple times")
    );
}

#[tokio::test]
async fn import_outlives_every_producer_handle() {
    let fixture = TransferFixture::new(2);
    let d0 = fixture.device(DeviceId(0));
    let d1 = fixture.device(DeviceId(1));
    let src = delayed_fill(
        &d0,
        &d0.create_stream().unwrap(),
        &[5],
        &[10i64, 20, 30, 40, 50],
        Duration::from_millis(20),
    )
    .unwrap();
    let moved = fixture.engine().transfer_to(&src, DeviceId(1)).unwrap();
    let consumer = d1.create_stream().unwrap();

    let capsule = moved.export(&consumer).unwrap();
    drop(moved);
    drop(src);
    let imported = DeviceArray::from_capsule(&capsule).unwrap();
    drop(capsule);

    consumer.synchronize().await.unwrap();
    let values: Vec<i64> = imported
        .read_bytes()
        .chunks_exact(8)
        .map(|b| i64::from_ne_bytes(b.try_into().unwrap()))
        .collect();
    assert_eq!(values, vec![10, 20, 30, 40, 50]);
}

#[tokio::test]
async fn unconsumed_capsule_keeps_the_buffer_alive() {
    let fixture = TransferFixture::new(1);
    let d0 = fixture.device(DeviceId(0));
    let pool = d0.pool();
    let handle = fixture.upload(DeviceId(0), &[256], &[7u8; 256]);

    let capsule = handle.export(d0.default_stream()).unwrap();
    drop(handle);
    assert_eq!(pool.used_bytes(), 256);

    drop(capsule);
    assert_eq!(pool.used_bytes(), 0);
    assert_eq!(pool.n_free_blocks(), 1);
}
