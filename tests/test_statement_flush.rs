//! Integration tests for statement-level flush ordering, row serialization,
//! and cursor refresh.

use bytes::Bytes;
use hostdb_lob_rs::convert::Converter;
use hostdb_lob_rs::lob::LobField;
use hostdb_lob_rs::row::{encode_locator_handle, BufferedRow, RowAccess};
use hostdb_lob_rs::service::MemoryLocatorService;
use hostdb_lob_rs::{Error, LobColumns};

fn utf8() -> Converter {
    Converter::for_ccsid(1208).unwrap()
}

#[tokio::test]
async fn test_execute_flushes_columns_ascending() {
    let mut svc = MemoryLocatorService::new();
    let mut columns = LobColumns::new();
    columns.push(LobField::binary(2, 100));
    columns.push(LobField::character(0, 100, utf8()));
    columns.push(LobField::character(1, 100, utf8()));

    for (index, value) in [(0, "a"), (1, "b")] {
        columns.field_mut(index).unwrap().set_string(value).unwrap();
    }
    columns
        .field_mut(2)
        .unwrap()
        .set_bytes(Bytes::from_static(&[0xFF]))
        .unwrap();

    columns.serialize_row(&mut svc).await.unwrap();

    // Handles are allocated sequentially, so they record the flush order.
    assert_eq!(columns.field(0).unwrap().handle(), Some(1));
    assert_eq!(columns.field(1).unwrap().handle(), Some(2));
    assert_eq!(columns.field(2).unwrap().handle(), Some(3));
}

#[tokio::test]
async fn test_handle_allocated_once_per_column() {
    let mut svc = MemoryLocatorService::new();
    let mut columns = LobColumns::new();
    columns.push(LobField::character(0, 100, utf8()));

    columns.field_mut(0).unwrap().set_string("first").unwrap();
    columns.serialize_row(&mut svc).await.unwrap();
    let first = columns.field(0).unwrap().handle().unwrap();

    // A later update reuses the bound handle instead of allocating again.
    columns.field_mut(0).unwrap().set_string("second").unwrap();
    columns.serialize_row(&mut svc).await.unwrap();

    assert_eq!(columns.field(0).unwrap().handle(), Some(first));
    assert_eq!(svc.object_count(), 1);
    assert_eq!(svc.object(first).unwrap(), b"second");
}

#[tokio::test]
async fn test_row_image_marks_null_columns() {
    let mut svc = MemoryLocatorService::new();
    let mut columns = LobColumns::new();
    columns.push(LobField::character(0, 100, utf8()));
    columns.push(LobField::binary(1, 100));

    columns.field_mut(1).unwrap().set_bytes(Bytes::from_static(b"x")).unwrap();
    let image = columns.serialize_row(&mut svc).await.unwrap();

    // Column 0 was never set: indicator 1, no handle bytes. Column 1 is
    // bound: indicator 0 plus the 8-byte handle.
    let handle = columns.field(1).unwrap().handle().unwrap();
    let mut expected = vec![1u8, 0];
    expected.extend_from_slice(&handle.to_be_bytes());
    assert_eq!(&image[..], &expected[..]);
}

#[tokio::test]
async fn test_refresh_rebinds_for_the_new_row() {
    let mut svc = MemoryLocatorService::new();
    svc.seed(10, b"row one".to_vec());
    svc.seed(11, b"row two".to_vec());

    let mut columns = LobColumns::new();
    columns.push(LobField::character(0, 100, utf8()));

    let row_one = BufferedRow::new(vec![Some(encode_locator_handle(10))]);
    columns.refresh_row(&row_one).unwrap();
    assert_eq!(
        columns.field_mut(0).unwrap().get_string(&mut svc).await.unwrap(),
        "row one"
    );

    let row_two = BufferedRow::new(vec![Some(encode_locator_handle(11))]);
    columns.refresh_row(&row_two).unwrap();
    assert_eq!(
        columns.field_mut(0).unwrap().get_string(&mut svc).await.unwrap(),
        "row two"
    );
}

#[tokio::test]
async fn test_refresh_discards_stale_edits() {
    let mut svc = MemoryLocatorService::new();
    svc.seed(10, b"fetched".to_vec());

    let mut columns = LobColumns::new();
    columns.push(LobField::character(0, 100, utf8()));
    columns.field_mut(0).unwrap().set_string("unflushed edit").unwrap();

    let row = BufferedRow::new(vec![Some(encode_locator_handle(10))]);
    columns.refresh_row(&row).unwrap();

    let field = columns.field(0).unwrap();
    assert!(!field.is_dirty());
    assert_eq!(
        columns.field_mut(0).unwrap().get_string(&mut svc).await.unwrap(),
        "fetched"
    );
    // The edit never reached the remote store.
    assert_eq!(svc.object_count(), 1);
    assert_eq!(svc.object(10).unwrap(), b"fetched");
}

#[tokio::test]
async fn test_null_round_trip_through_row() {
    let mut svc = MemoryLocatorService::new();
    svc.seed(10, b"present".to_vec());

    let mut columns = LobColumns::new();
    columns.push(LobField::character(0, 100, utf8()));
    columns.push(LobField::character(1, 100, utf8()));

    let mut row = BufferedRow::new(vec![Some(encode_locator_handle(10)), None]);
    columns.refresh_row(&row).unwrap();

    assert_eq!(
        columns
            .get_string(&mut row, 0, &mut svc)
            .await
            .unwrap()
            .as_deref(),
        Some("present")
    );
    assert!(!row.was_null());

    assert_eq!(columns.get_string(&mut row, 1, &mut svc).await.unwrap(), None);
    assert!(row.was_null());

    // Serializing the refreshed row keeps column 1 as NULL.
    let image = columns.serialize_row(&mut svc).await.unwrap();
    assert_eq!(image[9], 1);
}

#[tokio::test]
async fn test_unpositioned_cursor_is_rejected() {
    let mut svc = MemoryLocatorService::new();
    let mut columns = LobColumns::new();
    columns.push(LobField::character(0, 100, utf8()));

    let mut row = BufferedRow::unpositioned();
    assert!(matches!(
        columns.refresh_row(&row),
        Err(Error::CursorNotPositioned)
    ));
    assert!(matches!(
        columns.get_string(&mut row, 0, &mut svc).await,
        Err(Error::CursorNotPositioned)
    ));
}

#[tokio::test]
async fn test_flush_failure_surfaces_service_error() {
    let mut svc = MemoryLocatorService::new();
    svc.close();

    let mut columns = LobColumns::new();
    columns.push(LobField::character(0, 100, utf8()));
    columns.field_mut(0).unwrap().set_string("doomed").unwrap();

    assert!(matches!(
        columns.serialize_row(&mut svc).await,
        Err(Error::ConnectionClosed)
    ));
}
