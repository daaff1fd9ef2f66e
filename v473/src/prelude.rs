//! Prelude (helpful reexports) for this package

pub use crate::{
    card::{
        Card,
        FaultHandler,
        LevelSetup,
        LogFaults,
        RampEntry,
        Session,
        SineMode,
    },
    config::{
        Config,
        ResidualPolicy,
        ScaleFactorIndexing,
    },
    core::{
        Bound,
        Channel,
        OutOfRange,
    },
    playback::{
        PlayerSetup,
        RampPlayer,
    },
    transport::{
        mock::Mock,
        uio::Uio,
        Transport,
    },
    Property,
};
pub use fixed::types::I9F7;
