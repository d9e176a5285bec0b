// Dedicated server support: startup configuration and the frame writer thread.

pub mod net_io_thread;
pub mod sys_ded;
