use lock_core::ExternalLockProvider;
use lock_provider_fs::FileLockProvider;
use tempfile::tempdir;

#[test]
fn exclusive_lock_excludes_a_second_attempt() {
    let dir = tempdir().unwrap();
    let provider = FileLockProvider::new("fs", dir.path()).unwrap();
    let first = provider.get_lock("widgets").unwrap();
    assert!(first.is_some());
    let second = provider.get_lock("widgets").unwrap();
    assert!(second.is_none());
    drop(first);
    let third = provider.get_lock("widgets").unwrap();
    assert!(third.is_some());
}

#[test]
fn request_marker_is_visible_to_check() {
    let dir = tempdir().unwrap();
    let provider = FileLockProvider::new("fs", dir.path()).unwrap();
    assert!(!provider.check_lock_request("widgets").unwrap());
    let marker = provider.get_lock_request("widgets").unwrap();
    assert!(marker.is_some());
    assert!(provider.check_lock_request("widgets").unwrap());
    drop(marker);
    assert!(!provider.check_lock_request("widgets").unwrap());
}

#[test]
fn distinct_names_do_not_interfere() {
    let dir = tempdir().unwrap();
    let provider = FileLockProvider::new("fs", dir.path()).unwrap();
    let a = provider.get_lock("a").unwrap();
    let b = provider.get_lock("b").unwrap();
    assert!(a.is_some());
    assert!(b.is_some());
}

#[test]
fn release_allows_a_fresh_process_local_handle_to_acquire() {
    let dir = tempdir().unwrap();
    let provider = FileLockProvider::new("fs", dir.path()).unwrap();
    {
        let _held = provider.get_lock("rotating").unwrap().unwrap();
        assert!(provider.get_lock("rotating").unwrap().is_none());
    }
    assert!(provider.get_lock("rotating").unwrap().is_some());
}
