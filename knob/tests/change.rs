use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use knob::{ChangeToken, ChangeTrigger, on_change};

#[test]
fn test_trigger_fires_once() {
    let trigger = ChangeTrigger::new();
    let token = trigger.token();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    token.register(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(!token.has_changed());
    trigger.fire();
    trigger.fire();
    assert!(token.has_changed());
    assert!(trigger.token().has_changed());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_register_after_fire() {
    let trigger = ChangeTrigger::new();
    trigger.fire();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    trigger.token().register(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_never() {
    let token = ChangeToken::never();
    token.register(|| panic!("never token fired"));
    assert!(!token.has_changed());
}

#[test]
fn test_on_change_stops() {
    let trigger = Arc::new(Mutex::new(ChangeTrigger::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    let producer = trigger.clone();
    let counter = calls.clone();
    on_change(
        move || producer.lock().unwrap().token(),
        move || counter.fetch_add(1, Ordering::SeqCst) == 0,
    );
    for _ in 0..3 {
        let fired = std::mem::take(&mut *trigger.lock().unwrap());
        fired.fire();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
