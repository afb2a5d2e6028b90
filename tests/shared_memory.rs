// Shared memory backend tests for unix targets
// Run with: cargo test --test shared_memory -- --nocapture

#[cfg(unix)]
mod unix_tests {
    use serial_test::serial;
    use smipc::Core::SharedMemory::{
        create_shared_memory, open_shared_memory, PosixSharedMemory, RawHandle,
        SharedMemoryBackend, Signal, REGION_DATA_OFFSET,
    };
    use smipc::SPSC::ChannelBuilder;
    use smipc::Error;

    fn unique(name: &str) -> String {
        format!("smipc-test-{}-{}", name, std::process::id())
    }

    #[test]
    #[serial]
    fn test_create_shared_memory() {
        let size = 4096;
        let shm = create_shared_memory(&unique("create"), size).unwrap();

        assert_eq!(shm.size(), size);
        assert_eq!(shm.data_size(), size - REGION_DATA_OFFSET);
        assert!(!shm.as_ptr().is_null());
        assert_eq!(shm.ref_count(), 1);

        // Test writing to the data area
        unsafe {
            let slice = std::slice::from_raw_parts_mut(shm.data_ptr(), shm.data_size());
            slice[0] = 0x42;
            assert_eq!(slice[0], 0x42);
        }
    }

    #[test]
    #[serial]
    fn test_open_discovers_size() {
        let name = unique("discover");
        let created = create_shared_memory(&name, 64 * 1024).unwrap();
        let opened = open_shared_memory(&name).unwrap();

        assert_eq!(opened.size(), created.size());
        assert_eq!(opened.data_size(), created.data_size());
        assert_eq!(created.ref_count(), 2);

        unsafe {
            created.data_ptr().write(7);
            assert_eq!(opened.data_ptr().read(), 7);
        }

        opened.raise(Signal::Close);
        assert!(created.is_raised(Signal::Close));

        drop(opened);
        assert_eq!(created.ref_count(), 1);
    }

    #[test]
    #[serial]
    fn test_raw_handle() {
        let shm = create_shared_memory(&unique("handle"), 4096).unwrap();

        match shm.raw_handle() {
            RawHandle::Fd(fd) => assert!(fd >= 0),
            other => panic!("unexpected handle {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_creator_unlinks_on_drop() {
        let name = unique("unlink");
        let mut shm = PosixSharedMemory::create(&name, 4096).unwrap();
        assert!(shm.is_owner());

        // Exclusive create refuses an existing name.
        assert!(matches!(
            create_shared_memory(&name, 4096),
            Err(Error::SharedMemory { op: "create", .. })
        ));

        shm.close().unwrap();
        assert!(matches!(
            open_shared_memory(&name),
            Err(Error::SharedMemory { op: "open", .. })
        ));
    }

    #[test]
    #[serial]
    fn test_open_missing_region_fails() {
        let err = open_shared_memory(&unique("missing")).unwrap_err();
        assert!(matches!(err, Error::SharedMemory { .. }));
    }

    #[test]
    #[serial]
    fn test_names_with_nul_are_rejected() {
        assert!(matches!(
            create_shared_memory("bad\0name", 4096),
            Err(Error::InvalidName { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_consumer_refuses_uninitialised_region() {
        let name = unique("not-ready");
        let _region = create_shared_memory(&name, 4096).unwrap();

        let err = ChannelBuilder::new()
            .with_name(&name)
            .build_consumer()
            .unwrap_err();
        assert!(matches!(err, Error::NotInitialized { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    #[serial]
    fn test_named_channel_round_trip() {
        let name = unique("channel");
        let mut tx = ChannelBuilder::new()
            .with_name(&name)
            .with_region_size(8192)
            .build_producer()
            .unwrap();
        tx.send(b"first").unwrap();

        // Opening later sees what was queued before it attached.
        let mut rx = ChannelBuilder::new().with_name(&name).build_consumer().unwrap();
        assert_eq!(rx.message_count(), 1);
        assert_eq!(rx.capacity(), tx.capacity());

        tx.send(b"second").unwrap();
        assert_eq!(rx.pop().unwrap().payload, b"first");
        assert_eq!(rx.pop().unwrap().payload, b"second");
        assert!(rx.is_empty());
    }
}
