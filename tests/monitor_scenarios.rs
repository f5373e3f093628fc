//! End-to-end monitor scenarios
//!
//! Drives the full command surface against the stub engine: discovery,
//! filtering, breakpoint lifecycle, and metadata persistence.

use comonitor::app::commands::{run_line, CommandOutcome};
use comonitor::app::session::Session;
use comonitor::core::guid::Guid;
use comonitor::core::metadata::{ClassRecord, MetadataIndex, TypeRecord};
use comonitor::core::monitor::CoFilter;
use comonitor::core::registry::BitWidth;
use comonitor::debug::stub::StubEngine;
use comonitor::debug::EngineTarget;

const CLSID: &str = "{11111111-1111-1111-1111-111111111111}";
const IID: &str = "{22222222-2222-2222-2222-222222222222}";

fn guid(text: &str) -> Guid {
    text.parse().unwrap()
}

fn stub() -> EngineTarget {
    EngineTarget::Stub { pid: 0 }
}

/// Attach unfiltered, take one discovery event, break on slot 3, list,
/// delete, list again.
#[test]
fn discovery_breakpoint_lifecycle() {
    let mut session = Session::new();

    let mut engine = StubEngine::new(1234);
    engine.push_vtable("target", guid(CLSID), guid(IID), BitWidth::X64, 0x7ff0_0000);
    session
        .attach(Box::new(engine), CoFilter::NoFilter)
        .unwrap();

    // status pumps the discovery event into the registry.
    assert_eq!(run_line(&mut session, stub(), "status"), CommandOutcome::Success);
    let cotypes = session.monitor().unwrap().registry().list_cotypes();
    assert_eq!(cotypes.len(), 1);
    assert_eq!(cotypes[&guid(CLSID)], vec![(0x7ff0_0000, guid(IID))]);

    // First breakpoint gets id 0 and lands at base + 3 * pointer size.
    assert_eq!(
        run_line(&mut session, stub(), &format!("bp {} {} 3", CLSID, IID)),
        CommandOutcome::Success
    );
    {
        let breakpoints = session.monitor().unwrap().list_breakpoints();
        assert_eq!(breakpoints.len(), 1);
        assert_eq!(breakpoints[0].id, 0);
        assert_eq!(breakpoints[0].locations[0].address, 0x7ff0_0000 + 3 * 8);
    }
    assert_eq!(run_line(&mut session, stub(), "bl"), CommandOutcome::Success);

    assert_eq!(run_line(&mut session, stub(), "bd 0"), CommandOutcome::Success);
    assert!(session.monitor().unwrap().list_breakpoints().is_empty());
    assert_eq!(run_line(&mut session, stub(), "bl"), CommandOutcome::Success);
}

#[test]
fn including_and_excluding_filters() {
    let clsids = [
        "{aaaaaaaa-0000-0000-0000-000000000001}",
        "{aaaaaaaa-0000-0000-0000-000000000002}",
        "{aaaaaaaa-0000-0000-0000-000000000003}",
    ];

    let observe_all = |engine: &mut StubEngine| {
        for (i, clsid) in clsids.iter().enumerate() {
            engine.push_vtable(
                "target",
                guid(clsid),
                guid(IID),
                BitWidth::X64,
                0x1000 * (i as u64 + 1),
            );
        }
    };

    // Including {A, B}: C is dropped.
    let mut session = Session::new();
    let mut engine = StubEngine::new(1);
    observe_all(&mut engine);
    session
        .attach(
            Box::new(engine),
            CoFilter::Including([guid(clsids[0]), guid(clsids[1])].into()),
        )
        .unwrap();
    run_line(&mut session, stub(), "status");
    let registry = session.monitor().unwrap().registry();
    assert_eq!(registry.len(), 2);
    assert!(registry.find_vtables_by_clsid(guid(clsids[2])).is_empty());
    session.detach();

    // Excluding {C}: A and B survive.
    let mut engine = StubEngine::new(1);
    observe_all(&mut engine);
    session
        .attach(
            Box::new(engine),
            CoFilter::Excluding([guid(clsids[2])].into()),
        )
        .unwrap();
    run_line(&mut session, stub(), "status");
    let registry = session.monitor().unwrap().registry();
    assert_eq!(registry.len(), 2);
    assert!(registry.find_vtables_by_clsid(guid(clsids[2])).is_empty());
    session.detach();

    // No filter: all three.
    let mut engine = StubEngine::new(1);
    observe_all(&mut engine);
    session
        .attach(Box::new(engine), CoFilter::NoFilter)
        .unwrap();
    run_line(&mut session, stub(), "status");
    assert_eq!(session.monitor().unwrap().registry().len(), 3);
}

#[test]
fn metadata_survives_save_and_reload() {
    let mut index = MetadataIndex::new();
    let iids: Vec<Guid> = (1u32..=8)
        .map(|n| Guid::new(n, 0x10, 0x20, [n as u8; 8]))
        .collect();
    for (n, iid) in iids.iter().enumerate() {
        index.put_type(TypeRecord {
            iid: *iid,
            name: format!("IThing{}", n),
            methods: (n % 2 == 0).then(|| vec!["QueryInterface".into(), format!("Do{}", n)]),
        });
    }
    let clsids: Vec<Guid> = (100u32..104)
        .map(|n| Guid::new(n, 0, 0, [0xab; 8]))
        .collect();
    for (n, clsid) in clsids.iter().enumerate() {
        index.put_class(ClassRecord {
            clsid: *clsid,
            name: format!("Thing{}", n),
        });
    }

    let path = std::env::temp_dir().join("comonitor-scenario-index.json");
    index.save(&path).unwrap();

    // Rebuild from the saved file as a named source.
    let mut restored = MetadataIndex::new();
    restored.index_source(&path).unwrap();
    for iid in &iids {
        assert_eq!(
            restored.resolve_type_name(*iid),
            index.resolve_type_name(*iid)
        );
        assert_eq!(restored.get_type_methods(*iid), index.get_type_methods(*iid));
    }
    for clsid in &clsids {
        assert_eq!(
            restored.resolve_class_name(*clsid),
            index.resolve_class_name(*clsid)
        );
    }

    let _ = std::fs::remove_file(&path);
}

#[test]
fn detach_then_attach_starts_clean() {
    let mut session = Session::new();
    run_line(&mut session, stub(), "attach");
    run_line(&mut session, stub(), &format!("reg {} {} 0x9000", CLSID, IID));
    run_line(&mut session, stub(), &format!("bp {} {} 1", CLSID, IID));
    assert_eq!(session.monitor().unwrap().registry().len(), 1);
    assert_eq!(session.monitor().unwrap().list_breakpoints().len(), 1);

    assert_eq!(run_line(&mut session, stub(), "detach"), CommandOutcome::Success);
    // Idempotent second detach.
    assert_eq!(run_line(&mut session, stub(), "detach"), CommandOutcome::Success);

    run_line(&mut session, stub(), "attach");
    let monitor = session.monitor().unwrap();
    assert!(monitor.registry().is_empty());
    assert!(monitor.list_breakpoints().is_empty());
}

#[test]
fn breakpoint_by_name_matches_breakpoint_by_index() {
    let run_variant = |slot_arg: &str| -> u64 {
        let mut session = Session::new();
        session.metadata_mut().put_type(TypeRecord {
            iid: guid(IID),
            name: "IStorage".into(),
            methods: Some(vec![
                "QueryInterface".into(),
                "AddRef".into(),
                "Release".into(),
                "CreateStream".into(),
            ]),
        });
        run_line(&mut session, stub(), "attach");
        run_line(&mut session, stub(), &format!("reg {} {} 0x6000", CLSID, IID));
        assert_eq!(
            run_line(
                &mut session,
                stub(),
                &format!("bp {} {} {}", CLSID, IID, slot_arg)
            ),
            CommandOutcome::Success
        );
        session.monitor().unwrap().list_breakpoints()[0].locations[0].address
    };

    assert_eq!(run_variant("3"), run_variant("CreateStream"));
}

#[test]
fn pending_breakpoint_activates_on_manual_registration() {
    let mut session = Session::new();
    run_line(&mut session, stub(), "attach");

    assert_eq!(
        run_line(&mut session, stub(), &format!("bp {} {} 2", CLSID, IID)),
        CommandOutcome::Success
    );
    assert!(session.monitor().unwrap().list_breakpoints()[0].is_pending());

    run_line(&mut session, stub(), &format!("reg {} {} 0x2000", CLSID, IID));
    let breakpoints = session.monitor().unwrap().list_breakpoints();
    assert!(!breakpoints[0].is_pending());
    assert_eq!(breakpoints[0].locations[0].address, 0x2000 + 2 * 8);
}

#[test]
fn outcome_codes_are_distinguishable() {
    let mut session = Session::new();
    assert_eq!(run_line(&mut session, stub(), "bogus").exit_code(), 2);
    assert_eq!(run_line(&mut session, stub(), "bl").exit_code(), 3);
    assert_eq!(run_line(&mut session, stub(), "attach").exit_code(), 0);
    assert_eq!(run_line(&mut session, stub(), "bd 42").exit_code(), 1);
}
