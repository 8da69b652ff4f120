#![no_std]

use core::panic::PanicInfo;
use core::ptr::addr_of_mut;

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    loop {}
}

#[link(wasm_import_module = "env")]
extern "C" {
    fn log(level: i32, ptr: *const u8, len: i32);
    fn register_export(ptr: *const u8, len: i32) -> i32;
}

const SLOT_SIZE: usize = 16;
const TAG_NUMBER: i32 = 0;

const STATUS_OK: i32 = 0;
const STATUS_REJECTED: i32 = 1;

const INVALID_ARGC: &str = "Invalid number of arguments";
const INVALID_FIRST: &str = "Argument 1 is not a valid integer";
const INVALID_SECOND: &str = "Argument 2 is not a valid integer";

// 8 argument slots of 16 bytes each
static mut EXCHANGE: [u8; SLOT_SIZE * 8] = [0u8; SLOT_SIZE * 8];

fn exchange() -> &'static mut [u8; SLOT_SIZE * 8] {
    // Single-threaded guest; the host only touches the area between calls.
    unsafe { &mut *addr_of_mut!(EXCHANGE) }
}

fn number_at(slot: usize) -> Option<f64> {
    let area = exchange();
    let base = slot * SLOT_SIZE;
    let tag = i32::from_le_bytes([area[base], area[base + 1], area[base + 2], area[base + 3]]);
    if tag != TAG_NUMBER {
        return None;
    }
    let mut value = [0u8; 8];
    value.copy_from_slice(&area[base + 8..base + 16]);
    Some(f64::from_le_bytes(value))
}

fn reject(message: &'static str) -> i32 {
    let area = exchange();
    area[0..4].copy_from_slice(&(message.as_ptr() as i32).to_le_bytes());
    area[4..8].copy_from_slice(&(message.len() as i32).to_le_bytes());
    STATUS_REJECTED
}

#[no_mangle]
pub extern "C" fn exchange_area() -> i32 {
    addr_of_mut!(EXCHANGE) as i32
}

#[no_mangle]
pub extern "C" fn add(argc: i32) -> i32 {
    if argc != 2 {
        return reject(INVALID_ARGC);
    }
    let Some(a) = number_at(0) else {
        return reject(INVALID_FIRST);
    };
    let Some(b) = number_at(1) else {
        return reject(INVALID_SECOND);
    };

    // `as` truncates toward zero and saturates
    let sum = (a as i64).wrapping_add(b as i64);
    exchange()[0..8].copy_from_slice(&sum.to_le_bytes());
    STATUS_OK
}

#[no_mangle]
pub extern "C" fn _start() {
    let message = "Guest module initialized";
    let name = "add";
    unsafe {
        log(1, message.as_ptr(), message.len() as i32);
        register_export(name.as_ptr(), name.len() as i32);
    }
}
