#![no_std] // don't link the Rust standard library
#![no_main] // disable all Rust-level entry points

use bootloader_api::BootInfo;
use kernel::{apic, block, drivers, fs, gdt, interrupts, keyboard, logger, memory, net, per_cpu, process, serial, socket, task, time};
use x86_64::VirtAddr;

bootloader_api::entry_point!(kernel_main);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    logger::init_early();

    if let Some(fb) = boot_info.framebuffer.as_mut() {
        let info = fb.info();
        // SAFETY: the framebuffer handed to us by the bootloader lives for
        // the remainder of boot, which in practice is 'static from here on.
        let buffer: &'static mut [u8] = unsafe { &mut *(fb.buffer_mut() as *mut [u8]) };
        logger::init_framebuffer(buffer, info);
    }

    serial::init();
    logger::serial_ready();
    log::info!("Alteo booting...");

    interrupts::init();
    per_cpu::init();

    let phys_mem_offset = boot_info
        .physical_memory_offset
        .into_option()
        .expect("bootloader did not provide a physical memory offset");
    memory::init(VirtAddr::new(phys_mem_offset), &boot_info.memory_regions);
    gdt::update_ist_stacks();

    interrupts::init_pic();

    time::rtc::init();
    match apic::init() {
        Ok(()) => time::init_apic_driven(),
        Err(e) => {
            log::warn!("apic: {} - staying on legacy 8259 PIC and PIT", e);
            time::init();
        }
    }

    process::init();
    task::scheduler::init();

    keyboard::init();

    let pci_devices = drivers::init();
    log::info!("Discovered {} PCI device(s)", pci_devices);

    if let Some(gpu) = drivers::gpu::probe() {
        drivers::gpu::pfifo::init(gpu);
    } else {
        log::info!("gpu: no NVIDIA device found, PFIFO unavailable");
    }

    match block::init() {
        Ok(()) => {
            if let Err(e) = fs::ext2::init_root_fs() {
                log::warn!("ext2: root filesystem not mounted: {}", e);
            }
        }
        Err(e) => log::warn!("block: {}", e),
    }

    net::init();
    socket::init();

    // Interrupts stay masked at the PIC level until every handler and
    // subsystem above is ready to receive them.
    x86_64::instructions::interrupts::enable();

    log::info!("Alteo is up, entering scheduler");
    task::scheduler::start();
}

use core::panic::PanicInfo;

/// This function is called on panic.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("KERNEL PANIC: {}", info);
    kernel::hlt_loop();
}
