use iori_fmp4::{BoxScanner, Error, FourCC};

use crate::support::{concat, make_box};

fn with_size(mut data: Vec<u8>, size: u32) -> Vec<u8> {
    data[..4].copy_from_slice(&size.to_be_bytes());
    data
}

#[test]
fn test_size_to_end_of_file_is_rejected() {
    let data = concat(&[
        &make_box(b"styp", &[0; 4]),
        &with_size(make_box(b"mdat", &[0; 16]), 0),
    ]);

    let mut scanner = BoxScanner::new(&data, 0);
    assert_eq!(scanner.next().unwrap().unwrap().fourcc, FourCC(*b"styp"));
    assert_eq!(
        scanner.next(),
        Some(Err(Error::MalformedBox {
            fourcc: FourCC::MDAT,
            offset: 12,
            size: 0,
        }))
    );
    assert!(scanner.next().is_none());
}

#[test]
fn test_largesize_is_rejected() {
    let data = with_size(make_box(b"mdat", &[0; 8]), 1);
    let result: Result<Vec<_>, _> = BoxScanner::new(&data, 0).collect();
    assert!(matches!(result, Err(Error::MalformedBox { size: 1, .. })));
}

#[test]
fn test_zero_sized_child_is_rejected() {
    let child = with_size(make_box(b"traf", &[0; 8]), 0);
    let data = make_box(b"moof", &child);
    let moof = BoxScanner::new(&data, 0).next().unwrap().unwrap();

    let children: Result<Vec<_>, _> = BoxScanner::children(&data, &moof, 0).collect();
    assert!(matches!(
        children,
        Err(Error::MalformedBox {
            size: 0,
            offset: 8,
            ..
        })
    ));
}
