//! PFIFO command channels: push-buffer encoding, object binding, and
//! fence-based completion tracking.
//!
//! A channel owns a ring of 32-bit words (the push buffer) that the GPU
//! consumes starting at `get` up to the producer's `put`. Methods are
//! framed by a header word; see `Header` for the wire encoding.

use alloc::vec::Vec;
use spin::Mutex;
use x86_64::structures::paging::PhysFrame;

use super::{GpuFamily, GpuInfo};

/// Header bits, exactly as they appear on the wire.
const HEADER_INC: u32 = 0x2000_0000;
const HEADER_NONINC: u32 = 0x4000_0000;
const HEADER_JUMP: u32 = 0x8000_0000;
const SUBCHANNEL_SHIFT: u32 = 13;
const METHOD_MASK: u32 = 0x1FFC;

const MAX_SUBCHANNELS: usize = 8;
const MAX_CHANNELS: usize = 8;

/// NV50+ per-channel control-page register offsets, relative to the
/// channel's slot in BAR0 (this kernel models each channel's control page
/// as a flat MMIO block rather than GPU instance memory).
mod nv50_regs {
    pub const CHANNEL_STRIDE: usize = 0x1000;
    pub const IB_BASE: usize = 0x00; // lower 32 bits of indirect buffer base
    pub const IB_LIMIT: usize = 0x04;
    pub const GP_PUT: usize = 0x08;
    pub const GP_GET: usize = 0x0C;
    pub const ENABLE: usize = 0x10;
}

/// Classic (pre-NV50) PFIFO register addresses, as documented by the
/// nouveau project's register reference.
mod legacy_regs {
    pub const PFIFO_MODE: usize = 0x002504;
    pub const PFIFO_DMA: usize = 0x002508;
    pub const CACHE1_PUSH0: usize = 0x003200;
    pub const CACHE1_DMA_INSTANCE: usize = 0x003210;
    pub const CACHE1_DMA_PUT: usize = 0x003240;
    pub const CACHE1_DMA_GET: usize = 0x003244;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PfifoError {
    OutOfChannels,
    OutOfMemory,
    InvalidChannel,
    InvalidSubchannel,
    BufferFull,
    Timeout,
}

struct PushBuffer {
    virt: usize,
    phys: PhysFrame,
    frame_count: u64,
    size_bytes: usize,
    put: usize, // dword index
    get: usize,
}

impl PushBuffer {
    fn words(&self) -> &mut [u32] {
        unsafe {
            core::slice::from_raw_parts_mut(self.virt as *mut u32, self.size_bytes / 4)
        }
    }
}

struct FencePage {
    virt: usize,
    phys: PhysFrame,
    next_sequence: u64,
}

impl FencePage {
    fn read(&self) -> u64 {
        unsafe { core::ptr::read_volatile(self.virt as *const u64) }
    }
}

struct Channel {
    id: usize,
    push: PushBuffer,
    fence: FencePage,
    subchannel_class: [Option<u32>; MAX_SUBCHANNELS],
}

struct Pfifo {
    gpu: GpuInfo,
    channels: Vec<Option<Channel>>,
}

static PFIFO: Mutex<Option<Pfifo>> = Mutex::new(None);

const PUSH_BUFFER_PAGES: u64 = 4; // 16 KiB ring, plenty for method streams this kernel emits

fn alloc_nocache_pages(count: u64) -> Result<(usize, PhysFrame), PfifoError> {
    let frame = crate::memory::frame_allocator::allocate_contiguous(count)
        .ok_or(PfifoError::OutOfMemory)?;
    let phys = frame.start_address().as_u64();
    let virt = crate::memory::map_mmio(phys, (count * 4096) as usize)
        .map_err(|_| PfifoError::OutOfMemory)?;
    unsafe {
        core::ptr::write_bytes(virt as *mut u8, 0, (count * 4096) as usize);
    }
    Ok((virt, frame))
}

unsafe fn mmio_write32(gpu: &GpuInfo, offset: usize, value: u32) {
    unsafe { core::ptr::write_volatile((gpu.mmio_virt + offset) as *mut u32, value) };
}

unsafe fn mmio_read32(gpu: &GpuInfo, offset: usize) -> u32 {
    unsafe { core::ptr::read_volatile((gpu.mmio_virt + offset) as *const u32) }
}

/// Initialize the PFIFO subsystem against a probed GPU. Safe to call once
/// per boot; channels are allocated from here on out.
pub fn init(gpu: GpuInfo) {
    let mut channels = Vec::with_capacity(MAX_CHANNELS);
    channels.resize_with(MAX_CHANNELS, || None);
    *PFIFO.lock() = Some(Pfifo { gpu, channels });
    log::info!("pfifo: initialized with {} channel slots", MAX_CHANNELS);
}

pub fn is_initialized() -> bool {
    PFIFO.lock().is_some()
}

/// Allocate and program a new command channel, returning its id.
pub fn alloc_channel() -> Result<usize, PfifoError> {
    let mut guard = PFIFO.lock();
    let pfifo = guard.as_mut().ok_or(PfifoError::InvalidChannel)?;

    let id = pfifo
        .channels
        .iter()
        .position(|c| c.is_none())
        .ok_or(PfifoError::OutOfChannels)?;

    let (push_virt, push_frame) = alloc_nocache_pages(PUSH_BUFFER_PAGES)?;
    let (fence_virt, fence_frame) = alloc_nocache_pages(1)?;

    let push = PushBuffer {
        virt: push_virt,
        phys: push_frame,
        frame_count: PUSH_BUFFER_PAGES,
        size_bytes: (PUSH_BUFFER_PAGES * 4096) as usize,
        put: 0,
        get: 0,
    };
    let fence = FencePage { virt: fence_virt, phys: fence_frame, next_sequence: 0 };

    program_channel(&pfifo.gpu, id, &push);

    pfifo.channels[id] = Some(Channel {
        id,
        push,
        fence,
        subchannel_class: [None; MAX_SUBCHANNELS],
    });

    log::info!("pfifo: allocated channel {}", id);
    Ok(id)
}

fn program_channel(gpu: &GpuInfo, id: usize, push: &PushBuffer) {
    let phys = push.phys.start_address().as_u64();
    let limit = push.size_bytes as u32 - 1;

    match gpu.family {
        GpuFamily::Nv50Plus => {
            let base = id * nv50_regs::CHANNEL_STRIDE;
            unsafe {
                mmio_write32(gpu, base + nv50_regs::IB_BASE, phys as u32);
                mmio_write32(gpu, base + nv50_regs::IB_LIMIT, limit);
                mmio_write32(gpu, base + nv50_regs::GP_PUT, 0);
                mmio_write32(gpu, base + nv50_regs::GP_GET, 0);
                mmio_write32(gpu, base + nv50_regs::ENABLE, 1);
            }
        }
        GpuFamily::PreNv50 => unsafe {
            let mode = mmio_read32(gpu, legacy_regs::PFIFO_MODE);
            mmio_write32(gpu, legacy_regs::PFIFO_MODE, mode | (1 << id));
            mmio_write32(gpu, legacy_regs::PFIFO_DMA, phys as u32);
            mmio_write32(gpu, legacy_regs::CACHE1_DMA_INSTANCE, id as u32);
            mmio_write32(gpu, legacy_regs::CACHE1_PUSH0, 1);
            mmio_write32(gpu, legacy_regs::CACHE1_DMA_PUT, 0);
            mmio_write32(gpu, legacy_regs::CACHE1_DMA_GET, 0);
        },
    }
}

/// Bind `class` to `subchan` on `channel` by enqueuing a non-incrementing
/// method write to offset 0 carrying the class id.
pub fn bind(channel: usize, subchan: usize, class: u32) -> Result<(), PfifoError> {
    if subchan >= MAX_SUBCHANNELS {
        return Err(PfifoError::InvalidSubchannel);
    }
    push_methods(channel, subchan, 0, &[class], false)?;

    let mut guard = PFIFO.lock();
    let pfifo = guard.as_mut().ok_or(PfifoError::InvalidChannel)?;
    let ch = pfifo.channels.get_mut(channel).and_then(|c| c.as_mut()).ok_or(PfifoError::InvalidChannel)?;
    ch.subchannel_class[subchan] = Some(class);
    Ok(())
}

fn encode_header(incrementing: bool, subchan: usize, method: u32, word_count: usize) -> u32 {
    let header_type = if incrementing { HEADER_INC } else { HEADER_NONINC };
    header_type
        | ((word_count as u32) << 18)
        | ((subchan as u32) << SUBCHANNEL_SHIFT)
        | (method & METHOD_MASK)
}

/// Write a header followed by `words` into the push buffer, wrapping with
/// a jump header near the ring's end.
pub fn push_methods(channel: usize, subchan: usize, method: u32, words: &[u32], incrementing: bool) -> Result<(), PfifoError> {
    if subchan >= MAX_SUBCHANNELS {
        return Err(PfifoError::InvalidSubchannel);
    }

    let mut guard = PFIFO.lock();
    let pfifo = guard.as_mut().ok_or(PfifoError::InvalidChannel)?;
    let ch = pfifo.channels.get_mut(channel).and_then(|c| c.as_mut()).ok_or(PfifoError::InvalidChannel)?;

    let ring_len = ch.push.size_bytes / 4;
    let needed = words.len() + 1;

    if ch.push.put + needed + 1 > ring_len {
        // Not enough room before the ring end: emit a jump back to 0.
        let jump_header = HEADER_JUMP;
        let buf = ch.push.words();
        buf[ch.push.put] = jump_header;
        ch.push.put = 0;
    }

    if needed > ring_len {
        return Err(PfifoError::BufferFull);
    }

    let header = encode_header(incrementing, subchan, method, words.len());
    let buf = ch.push.words();
    buf[ch.push.put] = header;
    for (i, w) in words.iter().enumerate() {
        buf[ch.push.put + 1 + i] = *w;
    }
    ch.push.put += needed;

    Ok(())
}

/// Ring the doorbell: advance GP_PUT (NV50+) or CACHE1_DMA_PUT (pre-NV50)
/// to the channel's current `put`, in bytes.
pub fn kick(channel: usize) -> Result<(), PfifoError> {
    let guard = PFIFO.lock();
    let pfifo = guard.as_ref().ok_or(PfifoError::InvalidChannel)?;
    let ch = pfifo.channels.get(channel).and_then(|c| c.as_ref()).ok_or(PfifoError::InvalidChannel)?;

    let put_bytes = (ch.push.put * 4) as u32;
    match pfifo.gpu.family {
        GpuFamily::Nv50Plus => unsafe {
            mmio_write32(&pfifo.gpu, channel * nv50_regs::CHANNEL_STRIDE + nv50_regs::GP_PUT, put_bytes);
        },
        GpuFamily::PreNv50 => unsafe {
            mmio_write32(&pfifo.gpu, legacy_regs::CACHE1_DMA_PUT, put_bytes);
        },
    }
    Ok(())
}

/// Increment the channel's fence sequence and push the method(s) that make
/// the GPU write it back to fence memory on completion.
pub fn emit_fence(channel: usize) -> Result<u64, PfifoError> {
    let (family, seq, fence_phys) = {
        let mut guard = PFIFO.lock();
        let pfifo = guard.as_mut().ok_or(PfifoError::InvalidChannel)?;
        let ch = pfifo.channels.get_mut(channel).and_then(|c| c.as_mut()).ok_or(PfifoError::InvalidChannel)?;
        ch.fence.next_sequence += 1;
        (pfifo.gpu.family, ch.fence.next_sequence, ch.fence.phys.start_address())
    };

    match family {
        GpuFamily::Nv50Plus => {
            let addr = fence_phys.as_u64();
            let words = [
                (addr >> 32) as u32,
                addr as u32,
                seq as u32,
                1, // trigger
            ];
            push_methods(channel, 0, 0, &words, true)?;
        }
        GpuFamily::PreNv50 => {
            push_methods(channel, 0, 0, &[seq as u32], false)?;
        }
    }
    kick(channel)?;
    Ok(seq)
}

/// `fence_completed(channel, seq)`: the GPU-written fence value is `>= seq`.
pub fn fence_completed(channel: usize, seq: u64) -> Result<bool, PfifoError> {
    let guard = PFIFO.lock();
    let pfifo = guard.as_ref().ok_or(PfifoError::InvalidChannel)?;
    let ch = pfifo.channels.get(channel).and_then(|c| c.as_ref()).ok_or(PfifoError::InvalidChannel)?;
    Ok(ch.fence.read() >= seq)
}

const WAIT_FENCE_MAX_ITERS: u32 = 1_000_000;

/// Bounded busy-wait for `fence_completed(channel, seq)`.
pub fn wait_fence(channel: usize, seq: u64) -> Result<(), PfifoError> {
    for _ in 0..WAIT_FENCE_MAX_ITERS {
        if fence_completed(channel, seq)? {
            return Ok(());
        }
        core::hint::spin_loop();
    }
    Err(PfifoError::Timeout)
}

/// Emit a fresh fence and wait for it - "the GPU has drained this channel".
pub fn wait_idle(channel: usize) -> Result<(), PfifoError> {
    let seq = emit_fence(channel)?;
    wait_fence(channel, seq)
}

/// `wait_idle` every active channel, disable it, and free its push buffer
/// and fence page.
pub fn shutdown() {
    let active: Vec<usize> = {
        let guard = PFIFO.lock();
        match guard.as_ref() {
            Some(pfifo) => pfifo
                .channels
                .iter()
                .enumerate()
                .filter_map(|(id, c)| c.as_ref().map(|_| id))
                .collect(),
            None => return,
        }
    };

    // wait_idle locks PFIFO itself, so this has to happen before the
    // teardown pass below takes the lock for the duration of the loop.
    for id in &active {
        if let Err(e) = wait_idle(*id) {
            log::warn!("pfifo: channel {} did not idle before shutdown: {:?}", id, e);
        }
    }

    let mut guard = PFIFO.lock();
    let Some(pfifo) = guard.as_mut() else { return };

    for slot in pfifo.channels.iter_mut() {
        let Some(ch) = slot.take() else { continue };
        let id = ch.id;

        match pfifo.gpu.family {
            GpuFamily::Nv50Plus => unsafe {
                mmio_write32(&pfifo.gpu, id * nv50_regs::CHANNEL_STRIDE + nv50_regs::ENABLE, 0);
            },
            GpuFamily::PreNv50 => unsafe {
                let mode = mmio_read32(&pfifo.gpu, legacy_regs::PFIFO_MODE);
                mmio_write32(&pfifo.gpu, legacy_regs::PFIFO_MODE, mode & !(1 << id));
            },
        }

        free_channel_buffers(&ch);
    }
}

/// Unmap and release the physical frames backing a channel's push buffer
/// and fence page.
fn free_channel_buffers(ch: &Channel) {
    crate::memory::unmap_mmio(ch.push.virt, ch.push.size_bytes);
    for i in 0..ch.push.frame_count {
        let frame = PhysFrame::containing_address(ch.push.phys.start_address() + i * 4096);
        crate::memory::frame_allocator::deallocate_frame(frame);
    }

    crate::memory::unmap_mmio(ch.fence.virt, 4096);
    crate::memory::frame_allocator::deallocate_frame(ch.fence.phys);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encoding_matches_wire_layout() {
        let header = encode_header(true, 1, 0x100, 3);
        assert_eq!(header & HEADER_INC, HEADER_INC);
        assert_eq!((header >> SUBCHANNEL_SHIFT) & 0b111, 1);
        assert_eq!(header & METHOD_MASK, 0x100);
        assert_eq!((header >> 18) & 0x1FFF, 3);
    }

    #[test]
    fn nonincrementing_header_clears_inc_bit() {
        let header = encode_header(false, 0, 0, 1);
        assert_eq!(header & HEADER_NONINC, HEADER_NONINC);
        assert_eq!(header & HEADER_INC, 0);
    }

    #[test]
    fn method_offset_is_masked_to_valid_bits() {
        // A method offset above the 12:2 field must not bleed into the
        // subchannel or count bits.
        let header = encode_header(true, 2, 0xFFFF, 0);
        assert_eq!(header & METHOD_MASK, 0xFFFF & METHOD_MASK);
        assert_eq!((header >> SUBCHANNEL_SHIFT) & 0b111, 2);
    }
}
