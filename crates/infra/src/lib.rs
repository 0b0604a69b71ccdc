//! trieq infrastructure: FIFOs, FFT execution and the threads that drive
//! the display side of the equalizer

pub mod audio;
