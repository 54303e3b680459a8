// End-to-end scenarios through the public API
use can_frame_engine::canopen::{self, decode_sdo, InitiateTransfer, SdoCommand, SdoRole};
use can_frame_engine::utility::process_integer_signal;
use can_frame_engine::{
    CanFrame, ChannelObserver, Column, EngineConfig, FrameModel, ModelEvent, SharedFrameModel,
    TimestampMode,
};
use std::io::Write;
use std::sync::Arc;
use std::thread;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn frame(bus: u8, id: u32, ts: u64) -> CanFrame {
    CanFrame::new(id, &[0xAA]).with_bus(bus).with_timestamp(ts)
}

#[test]
fn aggregate_counting() {
    init_logging();
    let mut model = FrameModel::with_capacity(16);
    for (id, ts) in [(0x100, 1000), (0x100, 2000), (0x101, 1500), (0x100, 3500)] {
        model.ingest(frame(0, id, ts), false);
    }
    model.set_aggregate_mode(true);

    let rows: Vec<_> = model
        .frames()
        .iter()
        .map(|f| (f.bus, f.id, f.frame_count, f.time_delta_us))
        .collect();
    assert_eq!(rows, vec![(0, 0x100, 3, 1500), (0, 0x101, 1, 0)]);

    assert_eq!(model.header(Column::Remote.index()), "Cnt");
    assert_eq!(model.data(0, Column::Remote.index()), "3");
    assert_eq!(model.data(0, Column::TimeStamp.index()), "1500");
}

#[test]
fn canopen_classification() {
    assert_eq!(canopen::function_label(0x080), "SYNC");
    assert_eq!(canopen::function_label(0x081), "EMCY");
    assert_eq!(canopen::function_label(0x700), "HBEAT");
    assert_eq!(canopen::function_label(0x000), "NMT");
    assert_eq!(canopen::function_code(0x081), 1);
    assert_eq!(canopen::node_id(0x081), 1);
}

#[test]
fn sdo_decode() {
    let data = [0x43, 0x18, 0x10, 0x00, 0x04, 0, 0, 0];
    let sdo = decode_sdo(SdoRole::Server, &data).unwrap();
    assert_eq!(sdo.ccs, 2);
    assert_eq!(sdo.index, 0x1018);
    assert_eq!(sdo.subindex, 0);
    assert_eq!(
        sdo.command,
        SdoCommand::Initiate {
            download: false,
            transfer: InitiateTransfer::Expedited { bytes: 4 },
        }
    );

    // Same frame through the model's ASCII column
    let mut model = FrameModel::with_capacity(4);
    model.ingest(CanFrame::new(0x581, &data), false);
    assert_eq!(
        model.data(0, Column::Ascii.index()),
        "Server - I [0x1018 (4120)] SI [0], Initiate Domain Upload, expedited, n = 4"
    );
}

#[test]
fn sdo_size_uses_bytes_four_and_seven() {
    // Sized initiate: size comes from data[4] + 256 * data[7], skipping 5 and 6
    let data = [0x41, 0x00, 0x20, 0x01, 0x10, 0xFF, 0xFF, 0x02];
    let sdo = decode_sdo(SdoRole::Server, &data).unwrap();
    assert_eq!(
        sdo.command,
        SdoCommand::Initiate {
            download: false,
            transfer: InitiateTransfer::Sized { size: 0x0210 },
        }
    );
}

#[test]
fn signal_extraction_both_byte_orders() {
    let payload = [0x34, 0x12, 0, 0, 0, 0, 0, 0];
    assert_eq!(process_integer_signal(&payload, 0, 16, true, false), 0x1234);
    // Motorola: MSB at bit 7 of byte 0, continuing into byte 1
    assert_eq!(process_integer_signal(&payload, 7, 16, false, false), 0x3412);
}

#[test]
fn filter_default_rule() {
    let mut model = FrameModel::with_capacity(8);
    assert!(model.filters().is_empty());

    model.ingest(CanFrame::new(0x181, &[]), false);
    assert_eq!(model.filters().get(0x01), Some(true));

    model.set_filter_state(0x01, false);
    model.ingest(CanFrame::new(0x182, &[]), false);
    assert_eq!(model.filters().get(0x02), Some(false));
}

#[test]
fn marker_rendering() {
    let mut model = FrameModel::with_capacity(4);
    model.ingest(CanFrame::new_extended(0x7FFF_FFF3, &[]), false);
    assert_eq!(model.data(0, Column::Ascii.index()), "MARK 3");
}

#[test]
fn observer_sees_inserts_before_and_after() {
    let mut model = FrameModel::with_capacity(8);
    let (observer, events) = ChannelObserver::new();
    model.add_observer(Arc::new(observer));

    model.ingest(frame(0, 0x181, 1), true);
    model.ingest(frame(0, 0x181, 2), true);
    model.clear();

    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(
        events,
        vec![
            ModelEvent::FiltersUpdated,
            ModelEvent::AboutToInsert { first: 0, last: 0 },
            ModelEvent::Inserted { first: 0, last: 0 },
            ModelEvent::AboutToInsert { first: 1, last: 1 },
            ModelEvent::Inserted { first: 1, last: 1 },
            ModelEvent::Reset,
            ModelEvent::FiltersUpdated,
        ]
    );
}

#[test]
fn config_file_drives_model() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let filter_path = dir.path().join("filters.txt");
    std::fs::write(&filter_path, "1,T\n2,F\n").unwrap();

    let config_path = dir.path().join("engine.toml");
    let mut file = std::fs::File::create(&config_path).unwrap();
    writeln!(
        file,
        "capacity = 32\naggregate = false\nfilter_file = {:?}\n\n[display]\nhex_mode = false\ntimestamp_mode = \"seconds\"",
        filter_path
    )
    .unwrap();

    let config: EngineConfig = can_frame_engine::load_config(&config_path).unwrap();
    assert_eq!(config.display.timestamp_mode, TimestampMode::Seconds);

    let mut model = FrameModel::from_config(&config);
    model.ingest(CanFrame::new(0x181, &[]).with_timestamp(2_500_000), false);
    model.ingest(CanFrame::new(0x182, &[]), false);

    assert_eq!(model.row_count(), 1);
    assert_eq!(model.data(0, Column::FrameId.index()), "385");
    assert_eq!(model.data(0, Column::TimeStamp.index()), "2.50000");
}

#[test]
fn producer_thread_with_view_thread() {
    init_logging();
    let shared = SharedFrameModel::new(FrameModel::with_capacity(1024));
    let (observer, events) = ChannelObserver::new();
    shared.lock().add_observer(Arc::new(observer));

    let producer = shared.clone();
    let handle = thread::spawn(move || {
        let frames: Vec<_> = (0..100).map(|i| frame(0, 0x181, i)).collect();
        producer.ingest_bulk(frames)
    });
    assert_eq!(handle.join().unwrap(), 100);

    assert_eq!(shared.bulk_refresh(), 100);
    assert_eq!(shared.row_count(), 100);
    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(events, vec![ModelEvent::FiltersUpdated, ModelEvent::Reset]);
}
