//! Transport for a card exposed through a Linux userspace I/O (`/dev/uioN`) device, as created by a
//! VME bridge driver. The card's A24 window is mapped through the device and its interrupt is
//! delivered by blocking reads on the device file.

use super::{
    Error,
    InterruptHandler,
    Transport,
};
use memmap2::{
    MmapOptions,
    MmapRaw,
};
use std::{
    fmt,
    fs::File,
    io::{
        self,
        Read,
        Write,
    },
    os::fd::{
        AsRawFd,
        FromRawFd,
        OwnedFd,
    },
    path::Path,
    sync::{
        Mutex,
        PoisonError,
    },
    thread::{
        self,
        JoinHandle,
    },
};
use tracing::{
    debug,
    error,
};

/// The span of the card's registers, up to and including the reset register
pub const WINDOW_LEN: usize = 0x1_0000;

enum Wakeup {
    Interrupt,
    Stop,
}

/// Block until `irq` is readable or `wake` is signalled
fn wait(irq: &File, wake: &File) -> io::Result<Wakeup> {
    loop {
        let mut fds = [
            libc::pollfd {
                fd: irq.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: wake.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        // Safety: `fds` is a valid array of pollfds for the duration of the call
        let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if n < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }
        if fds[1].revents != 0 {
            return Ok(Wakeup::Stop);
        }
        if fds[0].revents & libc::POLLIN != 0 {
            return Ok(Wakeup::Interrupt);
        }
        if fds[0].revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "UIO device closed"));
        }
    }
}

/// The thread that waits on the UIO interrupt and runs the handler. Dropping it stops and joins
/// the thread.
struct Listener {
    vector: u8,
    wake: File,
    thread: Option<JoinHandle<()>>,
}

impl Listener {
    fn spawn(vector: u8, mut irq: File, handler: InterruptHandler) -> io::Result<Self> {
        // Safety: eventfd either fails or returns a new descriptor that nothing else owns
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let wake = File::from(unsafe { OwnedFd::from_raw_fd(fd) });
        let thread_wake = wake.try_clone()?;
        let thread = thread::Builder::new()
            .name(format!("v473-irq-{vector}"))
            .spawn(move || {
                let mut count = [0u8; 4];
                loop {
                    // Re-arm the interrupt, then block until it fires
                    if let Err(e) = irq.write_all(&1u32.to_ne_bytes()) {
                        error!(%e, "Failed to re-enable the UIO interrupt");
                        break;
                    }
                    match wait(&irq, &thread_wake) {
                        Ok(Wakeup::Interrupt) => {}
                        Ok(Wakeup::Stop) => break,
                        Err(e) => {
                            error!(%e, "Failed to wait on the UIO interrupt");
                            break;
                        }
                    }
                    if let Err(e) = irq.read_exact(&mut count) {
                        error!(%e, "Failed to read the UIO interrupt count");
                        break;
                    }
                    handler();
                }
                debug!(vector, "Interrupt listener exiting");
            })?;
        Ok(Self {
            vector,
            wake,
            thread: Some(thread),
        })
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Err(e) = (&self.wake).write_all(&1u64.to_ne_bytes()) {
            error!(%e, "Failed to wake the interrupt listener");
            return;
        }
        let Some(thread) = self.thread.take() else {
            return;
        };
        // A handler that drops the card runs on the listener itself
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            error!(vector = self.vector, "Interrupt listener panicked");
        }
    }
}

/// A card mapped through a UIO device
pub struct Uio {
    file: File,
    map: MmapRaw,
    listener: Mutex<Option<Listener>>,
}

impl Uio {
    /// Open the UIO device at `path` and map its first memory region, which must cover the card's
    /// register window
    /// # Errors
    /// Returns errors on file IO errors, including a region too small for the window
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = File::options().read(true).write(true).open(path.as_ref())?;
        let map = MmapOptions::new().len(WINDOW_LEN).map_raw(&file)?;
        Ok(Self {
            file,
            map,
            listener: Mutex::new(None),
        })
    }

    fn register_ptr(&self, offset: usize) -> Option<*mut u16> {
        if offset % 2 != 0 || offset + 2 > self.map.len() {
            error!(offset, len = self.map.len(), "Register access outside the mapped window");
            return None;
        }
        // Safety: the offset is within the mapping and 16-bit aligned
        Some(unsafe { self.map.as_mut_ptr().add(offset) }.cast::<u16>())
    }
}

impl fmt::Debug for Uio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let vector = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|l| l.vector);
        f.debug_struct("Uio")
            .field("map", &self.map)
            .field("vector", &vector)
            .finish()
    }
}

impl Transport for Uio {
    fn read_word(&self, offset: usize) -> u16 {
        match self.register_ptr(offset) {
            // Safety: the pointer is valid for the lifetime of the mapping, which we own
            Some(ptr) => unsafe { ptr.read_volatile() },
            // A bus error reads back all ones
            None => u16::MAX,
        }
    }

    fn write_word(&self, offset: usize, value: u16) {
        if let Some(ptr) = self.register_ptr(offset) {
            // Safety: the pointer is valid for the lifetime of the mapping, which we own
            unsafe { ptr.write_volatile(value) }
        }
    }

    fn connect_interrupt(&self, vector: u8, handler: InterruptHandler) -> Result<(), Error> {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return Err(Error::VectorInUse(vector));
        }
        *listener = Some(Listener::spawn(vector, self.file.try_clone()?, handler)?);
        Ok(())
    }

    fn disconnect_interrupt(&self, vector: u8) -> Result<(), Error> {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        match listener.take() {
            // Dropping the listener stops its thread and waits for it
            Some(l) if l.vector == vector => Ok(()),
            other => {
                *listener = other;
                Err(Error::VectorNotConnected(vector))
            }
        }
    }
}
