// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end scan pipeline: capture -> correct -> edit -> assemble ->
// persist -> delete, driven through `ScanService`.

use chrono::Utc;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};

use scanwerk_core::error::ScanwerkError;
use scanwerk_core::types::{DocumentId, DocumentState, FilterId, FolderColor, PageId};
use scanwerk_document::{CancelFlag, PdfInspector};
use scanwerk_engine::{AssemblyRequest, ScanService, ServiceEvent};
use scanwerk_store::DocumentQuery;

fn encode(image: DynamicImage) -> Vec<u8> {
    let mut buf = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// Dark background with a bright sheet, as a phone would capture it.
fn sheet_capture() -> Vec<u8> {
    let mut img = GrayImage::from_pixel(400, 500, Luma([30u8]));
    for y in 60..440 {
        for x in 50..350 {
            img.put_pixel(x, y, Luma([240u8]));
        }
    }
    encode(DynamicImage::ImageLuma8(img))
}

fn plain_capture(shade: u8) -> Vec<u8> {
    encode(DynamicImage::ImageRgb8(RgbImage::from_pixel(
        120,
        160,
        Rgb([shade, shade, 255 - shade]),
    )))
}

fn service() -> (tempfile::TempDir, ScanService) {
    let dir = tempfile::tempdir().unwrap();
    let service = ScanService::open(dir.path()).unwrap();
    (dir, service)
}

/// Capture each image in order and wait for its correction.
async fn capture_all(service: &ScanService, id: &DocumentId, captures: Vec<Vec<u8>>) -> Vec<PageId> {
    let mut handles = Vec::new();
    for raw in captures {
        handles.push(service.capture(id, raw, Utc::now()).await.unwrap());
    }
    let mut pages = Vec::new();
    for handle in handles {
        pages.push(handle.wait().await.unwrap().page_id);
    }
    pages
}

#[tokio::test]
async fn capture_edit_assemble_persist_delete() {
    let (dir, service) = service();
    let id = service.start_document(Some("Invoices"));
    let pages = capture_all(
        &service,
        &id,
        vec![sheet_capture(), plain_capture(40), plain_capture(200)],
    )
    .await;

    service.reorder_pages(&id, 0, 2).await.unwrap();
    service.rotate_page(&id, &pages[1], 90).await.unwrap();
    service.set_filter(&id, &pages[2], "grayscale").await.unwrap();

    let document = service.assemble(&id).await.unwrap().wait().await.unwrap();
    assert_eq!(document.state, DocumentState::Persisted);
    assert_eq!(
        document.pages.iter().map(|p| p.id).collect::<Vec<_>>(),
        vec![pages[1], pages[2], pages[0]]
    );

    let path = document.assembled_path.clone().unwrap();
    let thumbnail = document.thumbnail_ref.clone().unwrap();
    assert_eq!(document.size_bytes, std::fs::metadata(&path).unwrap().len());
    assert!(thumbnail.exists());

    let layout = PdfInspector::inspect_file(&path).unwrap();
    assert_eq!(layout.page_count, 3);
    // The rotated 120x160 capture is now landscape.
    assert_eq!(
        (layout.pages[0].image_width, layout.pages[0].image_height),
        (160, 120)
    );
    assert_eq!(layout.pages[1].color_space.as_deref(), Some("DeviceGray"));

    let listed = service.documents(&DocumentQuery::default()).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0], document);

    let work = service.create_folder("Work", None).unwrap();
    let taxes = service.create_folder("Taxes", Some(FolderColor::Emerald)).unwrap();
    service.add_to_folder(&work.id, &id).unwrap();
    service.add_to_folder(&taxes.id, &id).unwrap();

    service.delete_document(&id).await.unwrap();

    assert!(!path.exists());
    assert!(!thumbnail.exists());
    assert!(service.documents(&DocumentQuery::default()).unwrap().is_empty());
    for folder in [&work, &taxes] {
        let folder = service.folder(&folder.id).unwrap().unwrap();
        assert_eq!(folder.document_count(), 0);
        assert!(!folder.contains(&id));
    }
    for page in &pages {
        assert!(!dir.path().join("pages").join(page.to_string()).exists());
    }
    assert!(!service.is_open(&id));
}

#[tokio::test]
async fn reorder_moves_first_page_last() {
    let (_dir, service) = service();
    let id = service.start_document(None);
    let pages = capture_all(
        &service,
        &id,
        vec![plain_capture(10), plain_capture(90), plain_capture(170)],
    )
    .await;

    let snapshot = service.reorder_pages(&id, 0, 2).await.unwrap();
    let order: Vec<_> = snapshot.pages.iter().map(|p| p.id).collect();
    assert_eq!(order, vec![pages[1], pages[2], pages[0]]);
    for (i, page) in snapshot.pages.iter().enumerate() {
        assert_eq!(page.order_index, i);
    }
}

#[tokio::test]
async fn empty_document_is_not_assembled() {
    let (_dir, service) = service();
    let mut events = service.subscribe();
    let id = service.start_document(Some("Nothing"));

    let err = service.assemble(&id).await.unwrap().wait().await.unwrap_err();
    assert!(matches!(err, ScanwerkError::Validation { .. }));
    assert_eq!(service.document(&id).await.unwrap().state, DocumentState::Draft);
    assert_eq!(service.stats().unwrap().document_count, 0);
    assert!(matches!(
        events.recv().await.unwrap(),
        ServiceEvent::AssemblyFailed { .. }
    ));
}

#[tokio::test]
async fn cancelled_assembly_leaves_no_trace() {
    let (_dir, service) = service();
    let mut events = service.subscribe();
    let id = service.start_document(Some("Cancelled"));
    capture_all(&service, &id, vec![plain_capture(60), plain_capture(120)]).await;
    while events.try_recv().is_ok() {}

    let cancel = CancelFlag::new();
    cancel.cancel();
    let request = AssemblyRequest {
        cancel,
        ..AssemblyRequest::default()
    };
    let err = service
        .assemble_with(&id, request)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();

    assert!(matches!(err, ScanwerkError::Cancelled));
    let document = service.document(&id).await.unwrap();
    assert_eq!(document.state, DocumentState::Draft);
    assert!(document.assembled_path.is_none());
    assert_eq!(
        std::fs::read_dir(service.store().documents_dir()).unwrap().count(),
        0
    );
    assert_eq!(
        std::fs::read_dir(service.store().thumbnails_dir()).unwrap().count(),
        0
    );
    assert_eq!(service.stats().unwrap().document_count, 0);
    assert_eq!(
        events.recv().await.unwrap(),
        ServiceEvent::AssemblyCancelled { document_id: id }
    );
}

#[tokio::test]
async fn edits_queue_behind_running_assembly() {
    let (_dir, service) = service();
    let id = service.start_document(Some("Queued"));
    let pages = capture_all(&service, &id, vec![plain_capture(80)]).await;

    let handle = service.assemble(&id).await.unwrap();
    // Submitted after the assembly took the document lock.
    service.rotate_page(&id, &pages[0], 180).await.unwrap();

    let persisted = handle.wait().await.unwrap();
    assert_eq!(persisted.pages[0].rotation_degrees, 0);

    let current = service.document(&id).await.unwrap();
    assert_eq!(current.pages[0].rotation_degrees, 180);
    assert_eq!(current.state, DocumentState::Draft);
    assert!(current.version > persisted.version);
}

#[tokio::test]
async fn reopened_document_keeps_its_last_page() {
    let (_dir, service) = service();
    let id = service.start_document(Some("Single"));
    let pages = capture_all(&service, &id, vec![plain_capture(150)]).await;
    service.assemble(&id).await.unwrap().wait().await.unwrap();

    service.close_document(&id);
    service.open_document(&id).unwrap();
    let err = service.delete_page(&id, &pages[0]).await.unwrap_err();
    assert!(matches!(err, ScanwerkError::PrecludedOperation(_)));
    assert_eq!(service.document(&id).await.unwrap().pages.len(), 1);
}

#[tokio::test]
async fn reassembly_updates_catalog_record() {
    let (_dir, service) = service();
    let id = service.start_document(Some("Twice"));
    let pages = capture_all(&service, &id, vec![plain_capture(30), plain_capture(220)]).await;
    let first = service.assemble(&id).await.unwrap().wait().await.unwrap();

    service.delete_page(&id, &pages[1]).await.unwrap();
    service.set_filter_all(&id, "blackwhite").await.unwrap();
    let second = service.assemble(&id).await.unwrap().wait().await.unwrap();

    assert_eq!(second.assembled_path, first.assembled_path);
    assert_eq!(second.pages.len(), 1);
    assert_eq!(second.pages[0].applied_filter, FilterId::Blackwhite);
    let stats = service.stats().unwrap();
    assert_eq!(stats.document_count, 1);
    assert_eq!(stats.total_bytes, second.size_bytes);
    let layout = PdfInspector::inspect_file(second.assembled_path.unwrap()).unwrap();
    assert_eq!(layout.page_count, 1);
}

#[tokio::test]
async fn tiny_recrop_is_rejected_without_side_effects() {
    use scanwerk_core::types::NormalizedPoint;

    let (_dir, service) = service();
    let id = service.start_document(None);
    let pages = capture_all(&service, &id, vec![plain_capture(100)]).await;
    let before = service.document(&id).await.unwrap();

    let tiny = [
        NormalizedPoint { x: 0.45, y: 0.45 },
        NormalizedPoint { x: 0.55, y: 0.45 },
        NormalizedPoint { x: 0.55, y: 0.55 },
        NormalizedPoint { x: 0.45, y: 0.55 },
    ];
    let err = service.recrop_page(&id, &pages[0], tiny).await.unwrap_err();
    assert!(matches!(err, ScanwerkError::InvalidArgument(_)));
    assert_eq!(service.document(&id).await.unwrap(), before);

    let half = [
        NormalizedPoint { x: 0.0, y: 0.0 },
        NormalizedPoint { x: 1.0, y: 0.0 },
        NormalizedPoint { x: 1.0, y: 0.5 },
        NormalizedPoint { x: 0.0, y: 0.5 },
    ];
    let snapshot = service.recrop_page(&id, &pages[0], half).await.unwrap();
    assert!(snapshot.pages[0].crop_quad.is_some());
    let corrected = snapshot.pages[0].corrected_image_ref.clone().unwrap();
    let bytes = service.store().read(&corrected).unwrap();
    let img = image::load_from_memory(&bytes).unwrap();
    assert_eq!(img.width(), 120);
    assert_eq!(img.height(), 80);
}

#[tokio::test]
async fn recrop_during_correction_is_not_overwritten() {
    use scanwerk_core::types::NormalizedPoint;

    let (_dir, service) = service();
    let id = service.start_document(None);
    let half = [
        NormalizedPoint { x: 0.0, y: 0.0 },
        NormalizedPoint { x: 1.0, y: 0.0 },
        NormalizedPoint { x: 1.0, y: 0.5 },
        NormalizedPoint { x: 0.0, y: 0.5 },
    ];

    // Re-crop before waiting, so the background correction may finish
    // either side of it.
    let handle = service.capture(&id, plain_capture(100), Utc::now()).await.unwrap();
    let page_id = handle.page_id();
    service.recrop_page(&id, &page_id, half).await.unwrap();
    handle.wait().await.unwrap();

    let document = service.document(&id).await.unwrap();
    let page = &document.pages[0];
    assert!(page.crop_quad.is_some());
    let bytes = service
        .store()
        .read(page.corrected_image_ref.as_ref().unwrap())
        .unwrap();
    let img = image::load_from_memory(&bytes).unwrap();
    assert_eq!((img.width(), img.height()), (120, 80));
}

#[tokio::test]
async fn assembling_elsewhere_removes_the_old_file() {
    let (dir, service) = service();
    let id = service.start_document(Some("Moving"));
    capture_all(&service, &id, vec![plain_capture(60)]).await;
    let first = service.assemble(&id).await.unwrap().wait().await.unwrap();
    let old_path = first.assembled_path.unwrap();
    assert!(old_path.exists());

    let new_path = dir.path().join("exports").join("moving.pdf");
    let request = AssemblyRequest {
        destination: Some(new_path.clone()),
        ..AssemblyRequest::default()
    };
    let second = service
        .assemble_with(&id, request)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(second.assembled_path.as_ref(), Some(&new_path));
    assert!(new_path.exists());
    assert!(!old_path.exists());
    let stats = service.stats().unwrap();
    assert_eq!(stats.total_bytes, std::fs::metadata(&new_path).unwrap().len());
}
