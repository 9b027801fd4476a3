//! Random sequences of map and unmap requests checked page by page against a flat model

use aarch64::mem::{AddrRange, IpAddr, MemoryPage, Mode, PAddr, PAGESIZE};
use allocators::PagePool;
use hypervisor::arch::RecordingTlb;
use hypervisor::mm::{MapFlags, PageTable, PhysMapping, Stage2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

const PAGE: u64 = PAGESIZE as u64;
const BLOCK: u64 = 512 * PAGE;
const WINDOW_BEGIN: u64 = 1 << 30;
const WINDOW_PAGES: u64 = 4 * 512;
const POOL_PAGES: usize = 64;

const MODES: [Mode; 3] = [Mode::RWX, Mode::Read, Mode::Read.union(Mode::Write)];

fn pool() -> &'static PagePool {
    let memory = Box::leak(vec![MemoryPage::default(); POOL_PAGES].into_boxed_slice());
    let pool: &'static PagePool = Box::leak(Box::new(PagePool::new()));
    unsafe { pool.add_chunk(memory.as_mut_ptr().cast(), POOL_PAGES * PAGESIZE) };
    pool
}

fn normalized(mode: Mode) -> Mode {
    Mode::from_stage2_attrs(mode.stage2_attrs())
}

/// Pick a page range inside the window that is block aligned every now and then.
fn random_range(rng: &mut impl Rng) -> (u64, u64) {
    if rng.gen_bool(0.3) {
        let first = rng.gen_range(0..WINDOW_PAGES / 512);
        let blocks = rng.gen_range(1..=WINDOW_PAGES / 512 - first);
        (first * 512, blocks * 512)
    } else {
        let first = rng.gen_range(0..WINDOW_PAGES);
        let pages = rng.gen_range(1..=(WINDOW_PAGES - first).min(700));
        (first, pages)
    }
}

fn check(table: &PageTable<Stage2>, model: &HashMap<u64, (u64, Mode)>) {
    for page in 0..WINDOW_PAGES {
        let ipa = IpAddr::new(WINDOW_BEGIN + page * PAGE);
        match (table.translate(ipa), model.get(&page)) {
            (None, None) => {}
            (Some(translation), Some((pa, mode))) => {
                assert_eq!(translation.pa, PAddr::new(*pa), "output of page {page}");
                assert_eq!(
                    Mode::from_stage2_attrs(translation.attrs),
                    normalized(*mode),
                    "mode of page {page}"
                );
            }
            (translation, expected) => {
                panic!("page {page} is translated as {translation:?} but should be {expected:?}")
            }
        }
    }
}

#[test]
fn random_updates_match_the_model() {
    let mut rng = StdRng::seed_from_u64(0x5eed_cafe);
    let pool = pool();
    let tlb: &'static RecordingTlb = Box::leak(Box::new(RecordingTlb::new()));
    let mut table = PageTable::<Stage2>::new(48, 3, PhysMapping::identity(), pool, tlb).unwrap();
    let mut model: HashMap<u64, (u64, Mode)> = HashMap::new();

    for round in 0..300 {
        let (first, pages) = random_range(&mut rng);
        let range = AddrRange::from_len(IpAddr::new(WINDOW_BEGIN + first * PAGE), pages * PAGE);

        if rng.gen_bool(0.6) {
            // block aligned outputs allow blocks whenever the input is aligned as well
            let output = if rng.gen_bool(0.5) {
                rng.gen_range(1..64) * BLOCK
            } else {
                rng.gen_range(1..64 * 512) * PAGE
            };
            let mode = MODES[rng.gen_range(0..MODES.len())];
            table
                .map(range, PAddr::new(output), mode, MapFlags::OVERWRITE)
                .unwrap_or_else(|e| panic!("round {round}: mapping {range:?} failed with {e:?}"));
            for i in 0..pages {
                model.insert(first + i, (output + i * PAGE, mode));
            }
        } else {
            table
                .unmap(range)
                .unwrap_or_else(|e| panic!("round {round}: unmapping {range:?} failed with {e:?}"));
            for i in 0..pages {
                model.remove(&(first + i));
            }
        }

        if round % 25 == 0 {
            table.defrag();
        }
        check(&table, &model);
    }

    table.defrag();
    check(&table, &model);

    table
        .unmap(AddrRange::from_len(IpAddr::new(WINDOW_BEGIN), WINDOW_PAGES * PAGE))
        .unwrap();
    table.defrag();
    check(&table, &HashMap::new());

    table.destroy();
    assert_eq!(pool.free_pages(), POOL_PAGES);
}

#[test]
fn mapping_without_overwrite_never_changes_existing_pages() {
    let mut rng = StdRng::seed_from_u64(7);
    let pool = pool();
    let tlb: &'static RecordingTlb = Box::leak(Box::new(RecordingTlb::new()));
    let mut table = PageTable::<Stage2>::new(48, 4, PhysMapping::identity(), pool, tlb).unwrap();
    let mut model: HashMap<u64, (u64, Mode)> = HashMap::new();

    for _ in 0..200 {
        let (first, pages) = random_range(&mut rng);
        let range = AddrRange::from_len(IpAddr::new(WINDOW_BEGIN + first * PAGE), pages * PAGE);
        let output = rng.gen_range(1..64 * 512) * PAGE;

        // requesting a mapping that already exists is not a conflict
        let conflicting = (first..first + pages).any(|page| {
            model
                .get(&page)
                .is_some_and(|existing| *existing != (output + (page - first) * PAGE, Mode::RWX))
        });
        let result = table.map(range, PAddr::new(output), Mode::RWX, MapFlags::empty());
        if conflicting {
            assert!(result.is_err(), "{range:?} overlaps an existing mapping");
        } else {
            result.unwrap();
            for i in 0..pages {
                model.insert(first + i, (output + i * PAGE, Mode::RWX));
            }
        }
        check(&table, &model);
    }
}
