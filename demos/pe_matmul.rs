//! Example: Matrix Multiplication on a Row of Processing Elements
//!
//! Maps `C[i][k] += A[i][j] * B[j][k]` where each of four processing
//! elements owns one row of `C` and walks the `k` loop internally.
//!
//! Run with: cargo run --example pe_matmul

use systolic_memory_mapper::{map_kernel, KernelDesc, MappingOptions, Placement};

const KERNEL: &str = r#"{
    "name": "pe_matmul",
    "params": [],
    "arrays": [
        { "name": "A", "extents": ["4", "8"] },
        { "name": "B", "extents": ["8", "8"] },
        { "name": "C", "extents": ["4", "8"] }
    ],
    "statements": [{
        "name": "S",
        "iterators": ["i", "j", "k"],
        "domain": ["0 <= i < 4", "0 <= j < 8", "0 <= k < 8"],
        "schedule": ["i", "j"],
        "accesses": [
            { "array": "A", "index": ["i", "j"], "kind": "read" },
            { "array": "B", "index": ["j", "k"], "kind": "read" },
            { "array": "C", "index": ["i", "k"], "kind": "read" },
            { "array": "C", "index": ["i", "k"], "kind": "write" }
        ]
    }],
    "schedule": {
        "kernel_depth": 0,
        "shared_depth": 0,
        "spatial": [{ "dim": 0, "block_size": 4, "id": "t0" }]
    }
}"#;

fn main() {
    println!("=== Matrix Multiplication on 4 Processing Elements ===\n");

    let desc = KernelDesc::from_json(KERNEL).unwrap();

    for (label, options) in [
        ("All memories", MappingOptions::default()),
        ("Shared memory only", MappingOptions::new(true, false)),
        ("Global memory only", MappingOptions::global_only()),
    ] {
        println!("{}:", label);
        let mapping = map_kernel(&desc, &options).unwrap();
        for array in &mapping.arrays {
            for group in &array.groups {
                println!(
                    "  {} group {}: {} {}",
                    array.name,
                    group.id,
                    group.placement,
                    group.local_name.as_deref().unwrap_or("")
                );
                if let Some(tiling) = &group.tiling {
                    println!("    {}", tiling);
                }
            }
        }
        let private: usize = mapping.arrays.iter().map(|a| a.count(Placement::Private)).sum();
        println!("  ({} private groups)", private);
        println!();
    }

    println!("{}", map_kernel(&desc, &MappingOptions::default()).unwrap().summary);
}
