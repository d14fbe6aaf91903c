//! End-to-end runtime tests: real plugin images booted from a plugin
//! directory and driven through the app's phase machine.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use dirt::{App, Headless};

static DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Assemble a minimal image: header, import table, import names, extra
/// string blobs, then code. `make_code` receives the guest offsets of the
/// string blobs.
fn image_with(imports: &[&str], strings: &[&str], make_code: impl Fn(&[u32]) -> Vec<u16>) -> Vec<u8> {
    let table = 12usize;
    let names_base = table + (imports.len() + 1) * 4;

    let mut names = Vec::new();
    let mut key_ptrs = Vec::new();
    for name in imports {
        key_ptrs.push((names_base + names.len()) as u32);
        names.extend_from_slice(name.as_bytes());
        names.push(0);
    }

    let strings_base = names_base + names.len();
    let mut blobs = Vec::new();
    let mut string_ptrs = Vec::new();
    for s in strings {
        string_ptrs.push((strings_base + blobs.len()) as u32);
        blobs.extend_from_slice(s.as_bytes());
        blobs.push(0);
    }

    let mut code_off = strings_base + blobs.len();
    code_off = (code_off + 3) & !3;

    let code = make_code(&string_ptrs);

    let mut image = Vec::new();
    image.extend_from_slice(b"DIRT");
    image.extend_from_slice(&0u32.to_le_bytes());
    image.extend_from_slice(&(code_off as u32).to_le_bytes());
    for ptr in &key_ptrs {
        image.extend_from_slice(&ptr.to_le_bytes());
    }
    image.extend_from_slice(&0u32.to_le_bytes());
    image.extend_from_slice(&names);
    image.extend_from_slice(&blobs);
    image.resize(code_off, 0);
    for word in code {
        image.extend_from_slice(&word.to_le_bytes());
    }
    image
}

fn image(imports: &[&str], code: &[u16]) -> Vec<u8> {
    image_with(imports, &[], |_| code.to_vec())
}

/// Write plugin images under a fresh temp plugin directory and point a new
/// app at it.
fn app_with_plugins(plugins: &[(&str, Vec<u8>)]) -> (App, PathBuf) {
    let dir = std::env::temp_dir().join(format!(
        "dirt-test-{}-{}",
        std::process::id(),
        DIR_COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    for (name, image) in plugins {
        let plugin_dir = dir.join(name);
        fs::create_dir_all(&plugin_dir).unwrap();
        fs::write(plugin_dir.join(format!("{name}.drt")), image).unwrap();
    }
    let app = App::new(Box::new(Headless::new(640, 480)));
    app.model()
        .set("main.pluginDir", dir.to_str().unwrap());
    (app, dir)
}

fn set_slice(app: &App, key: u32, instructions: usize) {
    app.shared().vms.find(key).unwrap().core().speed = instructions;
}

/// vmExit(7) as soon as the first slice runs.
fn exit_plugin() -> Vec<u8> {
    image(
        &["vmExit"],
        &[
            0x2007, // movs r0, #7
            0x210C, // movs r1, #12
            0x680A, // ldr r2, [r1, #0]
            0x4790, // blx r2
            0xE7FE, // b .
        ],
    )
}

/// Increment r0 forever.
fn counter_plugin() -> Vec<u8> {
    image(
        &[],
        &[
            0x3001, // adds r0, #1
            0xE7FD, // b .-2
        ],
    )
}

/// Store through a wild pointer immediately.
fn crash_plugin() -> Vec<u8> {
    image(
        &[],
        &[
            0x2001, // movs r0, #1
            0x0700, // lsls r0, r0, #28
            0x6001, // str r1, [r0, #0]
            0xE7FE, // b .
        ],
    )
}

#[test]
fn boot_and_exit_releases_the_vm_but_not_the_app() {
    let (mut app, _dir) = app_with_plugins(&[("echo", exit_plugin())]);

    let key = app.shared().boot_vm(vec!["echo".to_string()]);
    assert_ne!(key, 0);
    assert!(app.shared().vms.find(key).is_some());
    set_slice(&app, key, 10_000);

    for _ in 0..4 {
        app.update();
        if app.shared().vms.find(key).is_none() {
            break;
        }
    }

    assert!(app.shared().vms.find(key).is_none(), "handle released");
    assert!(app.shared().pool.is_empty());
    assert!(!app.shared().pool.busy());
    // no "exit host when no plugins" rule
    assert!(app.running());
    app.update();
}

#[test]
fn missing_or_invalid_plugins_do_not_reach_the_pool() {
    let (app, _dir) = app_with_plugins(&[("broken", b"not an image".to_vec())]);
    assert_eq!(app.shared().boot_vm(vec!["absent".to_string()]), 0);
    assert_eq!(app.shared().boot_vm(vec!["broken".to_string()]), 0);
    assert!(app.shared().pool.is_empty());
    assert_eq!(app.shared().boot_vm(Vec::new()), 0);
}

#[test]
fn vm_system_routes_messages_by_decimal_handle() {
    // alpha's command line bakes in beta's handle: the second VM created
    // in this app gets 0x10000001 = 268435457
    let alpha = image_with(
        &["vmSystem"],
        &["268435457 ping hello"],
        |strings| {
            let cmd = strings[0];
            assert!(cmd < 256);
            vec![
                0x2000 | cmd as u16, // movs r0, #<cmd>
                0x210C,              // movs r1, #12
                0x680A,              // ldr r2, [r1, #0]
                0x4790,              // blx r2
                0xE7FE,              // b .
            ]
        },
    );
    let beta = image(
        &["popMessage", "getMessageArg"],
        &[
            0x210C, // movs r1, #12
            0x680E, // ldr r6, [r1, #0]
            0x2110, // movs r1, #16
            0x680F, // ldr r7, [r1, #0]
            // loop:
            0x47B0, // blx r6 (popMessage)
            0x2800, // cmp r0, #0
            0xD0FC, // beq loop
            0x0004, // movs r4, r0
            0x2001, // movs r0, #1
            0x47B8, // blx r7 (getMessageArg)
            0x0005, // movs r5, r0
            0xE7FE, // b .
        ],
    );
    let (mut app, _dir) = app_with_plugins(&[("alpha", alpha), ("beta", beta)]);

    let alpha_key = app.shared().boot_vm(vec!["alpha".to_string()]);
    let beta_key = app.shared().boot_vm(vec!["beta".to_string()]);
    assert_eq!(alpha_key, 0x1000_0000);
    assert_eq!(beta_key, 0x1000_0001);
    set_slice(&app, alpha_key, 50_000);
    set_slice(&app, beta_key, 50_000);

    let beta_vm = app.shared().vms.find(beta_key).unwrap();
    let mut argc = 0;
    let mut arg_ptr = 0;
    for _ in 0..50 {
        app.update();
        let core = beta_vm.core();
        argc = core.cpu().reg[4];
        arg_ptr = core.cpu().reg[5];
        drop(core);
        if argc != 0 && arg_ptr != 0 {
            break;
        }
    }

    assert_eq!(argc, 3, "recipient id + two payload tokens");
    assert_eq!(beta_vm.core().read_guest_str(arg_ptr), "ping");
}

#[test]
fn vm_system_boots_plugins_by_name() {
    let spawn = image_with(&["vmSystem"], &["worker"], |strings| {
        let cmd = strings[0];
        assert!(cmd < 256);
        vec![
            0x2000 | cmd as u16, // movs r0, #<cmd>
            0x210C,              // movs r1, #12
            0x680A,              // ldr r2, [r1, #0]
            0x4790,              // blx r2
            0x0004,              // movs r4, r0 (the new VM's handle)
            0xE7FE,              // b .
        ]
    });
    let (mut app, _dir) =
        app_with_plugins(&[("spawn", spawn), ("worker", counter_plugin())]);

    let spawn_key = app.shared().boot_vm(vec!["spawn".to_string()]);
    assert_eq!(spawn_key, 0x1000_0000);
    set_slice(&app, spawn_key, 10_000);

    for _ in 0..10 {
        app.update();
        if app.shared().vms.find(0x1000_0001u32).is_some() {
            break;
        }
    }
    assert!(
        app.shared().vms.find(0x1000_0001u32).is_some(),
        "worker plugin booted on demand"
    );
    let spawner = app.shared().vms.find(spawn_key).unwrap();
    assert_eq!(spawner.core().cpu().reg[4], 0x1000_0001);
}

#[test]
fn guests_observe_events_through_the_ring() {
    // subscribe to Update, then poll until something other than the
    // MaxEvent sentinel (13) arrives
    let listener = image(
        &["enableEvent", "pollEvents"],
        &[
            0x2002, // movs r0, #2 (Update)
            0x210C, // movs r1, #12
            0x680A, // ldr r2, [r1, #0]
            0x4790, // blx r2 (enableEvent)
            0x2110, // movs r1, #16
            0x680A, // ldr r2, [r1, #0]
            // loop:
            0x4790, // blx r2 (pollEvents)
            0x280D, // cmp r0, #13
            0xD0FC, // beq loop
            0x0004, // movs r4, r0
            0xE7FE, // b .
        ],
    );
    let (mut app, _dir) = app_with_plugins(&[("listener", listener)]);
    let key = app.shared().boot_vm(vec!["listener".to_string()]);
    set_slice(&app, key, 20_000);

    let vm = app.shared().vms.find(key).unwrap();
    let mut seen = 0;
    for _ in 0..20 {
        app.update();
        seen = vm.core().cpu().reg[4];
        if seen != 0 {
            break;
        }
    }
    assert_eq!(seen, 2, "Update event id delivered through the ring");
}

#[test]
fn a_crashed_vm_stays_pooled_and_does_not_disturb_others() {
    let (mut app, _dir) =
        app_with_plugins(&[("crash", crash_plugin()), ("work", counter_plugin())]);

    let crash_key = app.shared().boot_vm(vec!["crash".to_string()]);
    let work_key = app.shared().boot_vm(vec!["work".to_string()]);
    set_slice(&app, crash_key, 10_000);
    set_slice(&app, work_key, 10_000);

    app.update();
    app.update();

    let crashed = app.shared().vms.find(crash_key).unwrap();
    assert!(crashed.crashed());
    // still findable and snapshotable until explicitly released
    assert!(!crashed.suspend().is_empty());

    let worker = app.shared().vms.find(work_key).unwrap();
    let before = worker.core().cpu().reg[0];
    app.update();
    let after = worker.core().cpu().reg[0];
    assert!(after > before, "healthy VM keeps progressing");

    app.shared().release_vm(crash_key);
    assert!(app.shared().vms.find(crash_key).is_none());
}

#[test]
fn phase_machine_waits_for_all_slices_before_returning() {
    let (mut app, _dir) = app_with_plugins(&[("work", counter_plugin())]);
    let key = app.shared().boot_vm(vec!["work".to_string()]);
    set_slice(&app, key, 20_000);

    for _ in 0..3 {
        app.update();
        assert!(!app.shared().pool.busy(), "no slice outlives the tick");
    }
}

#[test]
fn app_boot_reads_settings_and_starts_the_main_plugin() {
    let (mut app, dir) = app_with_plugins(&[("echo", exit_plugin())]);
    let settings = dir.join("settings.ini");
    fs::write(
        &settings,
        format!(
            "[main]\nplugin = echo\npluginDir = {}\n",
            dir.to_str().unwrap()
        ),
    )
    .unwrap();
    app.model()
        .set("main.settings", settings.to_str().unwrap());

    app.boot();
    assert_eq!(app.shared().vms.count(), 1);
    for _ in 0..4 {
        app.update();
        if app.shared().pool.is_empty() {
            break;
        }
    }
    assert!(app.shared().pool.is_empty(), "echo exited via vmExit");
}
