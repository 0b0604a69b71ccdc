//! trieq core: parameters, filter design, the real-time update protocol and
//! the analysis maths of a three-band equalizer
//!
//! Everything here is platform independent. Threads, FIFOs and FFT
//! execution live in `trieq-infra`.

pub mod domain;
