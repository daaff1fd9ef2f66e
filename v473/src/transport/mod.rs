//! Defines the platform boundary that every V473 transport must implement

pub mod mock;
pub mod uio;

use std::{
    sync::Arc,
    time::Duration,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Internal system IO error")]
    Io(#[from] std::io::Error),
    #[error("Interrupt vector {0} is already connected")]
    VectorInUse(u8),
    #[error("Interrupt vector {0} isn't connected")]
    VectorNotConnected(u8),
    #[error("Failed to unpack a register layout")]
    Packing(#[from] packed_struct::PackingError),
}

/// The routine a transport runs when the card raises its interrupt line
pub type InterruptHandler = Arc<dyn Fn() + Send + Sync>;

/// Types that implement this trait can be serialized such that they can be written to a 16-bit card
/// register
pub trait Serialize {
    type Chunk;
    fn serialize(&self) -> Self::Chunk;
}

/// Types that implement this trait can be deserialized such that they can be read from a 16-bit
/// card register
pub trait Deserialize: Sized {
    type Chunk;
    fn deserialize(chunk: Self::Chunk) -> Result<Self, Error>;
}

macro_rules! serde_word {
    ($num:ty) => {
        impl Serialize for $num {
            type Chunk = [u8; 2];
            fn serialize(&self) -> Self::Chunk {
                self.to_be_bytes()
            }
        }

        impl Deserialize for $num {
            type Chunk = [u8; 2];
            fn deserialize(chunk: Self::Chunk) -> Result<Self, Error> {
                Ok(<$num>::from_be_bytes(chunk))
            }
        }
    };
}

// The card's bus is 16 bits wide
serde_word!(u16);
serde_word!(i16);

/// The trait that is implemented for the platform services a card needs: access to its
/// memory-mapped registers and a way to attach to its interrupt vector.
///
/// Register accesses are single volatile 16-bit bus cycles and can't fail once the window is
/// mapped. Offsets are in bytes from the card's base address.
pub trait Transport: Send + Sync {
    /// Read the 16-bit register at byte offset `offset`
    fn read_word(&self, offset: usize) -> u16;

    /// Write `value` to the 16-bit register at byte offset `offset`
    fn write_word(&self, offset: usize, value: u16);

    /// Generically read a `Deserializable` register layout `R` from byte offset `offset`
    /// # Errors
    /// Returns an error if the word doesn't unpack into `R`
    fn read<R>(&self, offset: usize) -> Result<R, Error>
    where
        R: Deserialize<Chunk = [u8; 2]>,
    {
        R::deserialize(self.read_word(offset).to_be_bytes())
    }

    /// Generically write a `Serializable` register layout `R` to byte offset `offset`
    fn write<R>(&self, offset: usize, data: &R)
    where
        R: Serialize<Chunk = [u8; 2]>,
    {
        self.write_word(offset, u16::from_be_bytes(data.serialize()));
    }

    /// Attach `handler` to interrupt vector `vector`
    /// # Errors
    /// Returns an error if the vector can't be connected
    fn connect_interrupt(&self, vector: u8, handler: InterruptHandler) -> Result<(), Error>;

    /// Detach whatever handler is attached to `vector`
    /// # Errors
    /// Returns an error if nothing was attached
    fn disconnect_interrupt(&self, vector: u8) -> Result<(), Error>;

    /// Block the calling thread for `duration`
    fn delay(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
