// 全局内存分配器：使用 jemalloc
#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

// 分层结构：shared → domain → application → infrastructure → interfaces
pub mod shared;
pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod interfaces;
