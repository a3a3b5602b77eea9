use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::*;

type Log<T> = Rc<RefCell<Vec<T>>>;

fn log<T>() -> Log<T> {
    Rc::new(RefCell::new(Vec::new()))
}

/// Child block stored in slot `index` of `parent`.
fn child_at(cache: &Cache, parent: ListId, index: usize) -> ListId {
    cache.list(parent).unwrap().entries()[index].child().unwrap()
}

#[test]
fn test_slots_round_trip_across_passes() {
    let mut cache = Cache::new();
    let counter = TypeTag::token("counter");

    for pass in 0..5u32 {
        cache
            .run_pass(|c| {
                let n = c.slot(counter, || 0u32)?;
                assert_eq!(*n, pass);
                *n += 1;

                let label = c.get_or_create_slot(TypeTag::of::<String>())?;
                if pass == 0 {
                    assert!(label.is_vacant());
                } else {
                    let expected = format!("pass {}", pass - 1);
                    assert_eq!(label.get::<String>(), Some(&expected));
                }
                c.set_slot(format!("pass {pass}"))?;
                Ok(())
            })
            .unwrap();
    }
    assert_eq!(cache.pass_count(), 5);
    assert!(!cache.is_rendering());
}

#[test]
fn test_remember_returns_same_instance() {
    let mut cache = Cache::new();
    let first = Rc::new(RefCell::new(None));

    for _ in 0..3 {
        cache
            .run_pass(|c| {
                let state = c.remember_state(|| vec![1, 2])?;
                let mut first = first.borrow_mut();
                match first.as_ref() {
                    None => *first = Some(state),
                    Some(prev) => assert!(Rc::ptr_eq(prev, &state)),
                }
                Ok(())
            })
            .unwrap();
    }
}

fn visit_n(c: &mut Cache, n: usize) -> Result<()> {
    c.block(|c| {
        for _ in 0..n {
            c.remember(|| 0u8)?;
        }
        Ok(())
    })
}

#[test]
fn test_derived_block_rejects_changed_arity() {
    let mut cache = Cache::new();
    cache.run_pass(|c| visit_n(c, 2)).unwrap();

    let err = cache.run_pass(|c| visit_n(c, 3)).unwrap_err();
    assert_eq!(
        err,
        EngineError::ArityMismatch {
            kind: BlockKind::Derived,
            expected: 2,
            found: 3,
        }
    );
    assert!(!cache.is_rendering());

    // the failed pass is gone; the original shape still replays
    cache.run_pass(|c| visit_n(c, 2)).unwrap();
}

#[test]
fn test_positional_mismatch_is_fatal() {
    let mut cache = Cache::new();
    cache
        .run_pass(|c| {
            c.remember(|| 1u8)?;
            Ok(())
        })
        .unwrap();

    let err = cache
        .run_pass(|c| {
            c.remember(|| "one")?;
            Ok(())
        })
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::PositionalMismatch {
            index: 0,
            expected: TypeTag::of::<Rc<u8>>(),
            found: TypeTag::of::<Rc<&str>>(),
        }
    );
}

#[test]
fn test_type_tags() {
    assert_eq!(TypeTag::of::<u8>(), TypeTag::of::<u8>());
    assert_ne!(TypeTag::of::<u8>(), TypeTag::of::<u16>());
    assert_ne!(TypeTag::token("div"), TypeTag::token("div"));
    assert_eq!(TypeTag::token("div").label(), "div");
}

fn toggled(c: &mut Cache, show: bool, policy: SweepPolicy, torn: &Log<&'static str>) -> Result<()> {
    c.if_with_policy(policy, show, |c| {
        if c.memo(())? == MemoResult::FirstRender {
            let torn = torn.clone();
            c.on_teardown(move || torn.borrow_mut().push("branch"))?;
        }
        let count = c.remember_state(|| 0)?;
        *count.borrow_mut() += 1;
        Ok(())
    })?
    .end_if()
}

#[test]
fn test_untaken_branch_is_destroyed() {
    let mut cache = Cache::new();
    let torn = log();
    let branch = Cell::new(None);

    cache
        .run_pass(|c| toggled(c, true, SweepPolicy::Destroy, &torn))
        .unwrap();
    let cond = child_at(&cache, cache.root(), 0);
    branch.set(Some(child_at(&cache, cond, 0)));
    assert!(torn.borrow().is_empty());

    cache
        .run_pass(|c| toggled(c, false, SweepPolicy::Destroy, &torn))
        .unwrap();
    assert_eq!(*torn.borrow(), vec!["branch"]);
    assert_eq!(
        cache.removal_level(branch.get().unwrap()),
        RemovalLevel::Destroyed
    );
    assert!(cache.list(cond).unwrap().is_empty());

    // coming back starts from scratch
    cache
        .run_pass(|c| {
            c.if_(true, |c| {
                assert_eq!(c.memo(())?, MemoResult::FirstRender);
                let count = c.remember_state(|| 0)?;
                assert_eq!(*count.borrow(), 0);
                *count.borrow_mut() += 1;
                Ok(())
            })?
            .end_if()
        })
        .unwrap();
    assert_eq!(torn.borrow().len(), 1);
}

#[test]
fn test_detached_branch_resumes_with_state() {
    let mut cache = Cache::new();
    let torn = log();

    cache
        .run_pass(|c| toggled(c, true, SweepPolicy::Detach, &torn))
        .unwrap();
    let cond = child_at(&cache, cache.root(), 0);
    let branch = child_at(&cache, cond, 0);

    cache
        .run_pass(|c| toggled(c, false, SweepPolicy::Detach, &torn))
        .unwrap();
    assert_eq!(cache.removal_level(branch), RemovalLevel::Detached);
    assert!(!cache.list(branch).unwrap().is_reachable());
    assert!(torn.borrow().is_empty());

    cache
        .run_pass(|c| {
            c.if_with_policy(SweepPolicy::Detach, true, |c| {
                assert_eq!(c.memo(())?, MemoResult::FirstRenderConditional);
                let count = c.remember_state(|| 0)?;
                assert_eq!(*count.borrow(), 1);
                *count.borrow_mut() += 1;
                Ok(())
            })?
            .end_if()
        })
        .unwrap();
    assert_eq!(cache.removal_level(branch), RemovalLevel::Present);
    assert!(cache.list(branch).unwrap().started_reentering());

    drop(cache);
    assert_eq!(*torn.borrow(), vec!["branch"]);
}

#[test]
fn test_else_branch_replaces_if_branch() {
    let mut cache = Cache::new();
    let torn = log();

    let view = |c: &mut Cache, flag: bool| -> Result<()> {
        c.if_(flag, |c| {
            if c.memo(())?.is_first() {
                let torn = torn.clone();
                c.on_teardown(move || torn.borrow_mut().push("then"))?;
            }
            Ok(())
        })?
        .else_(|c| {
            c.remember(|| "else state")?;
            Ok(())
        })
    };

    cache.run_pass(|c| view(c, true)).unwrap();
    cache.run_pass(|c| view(c, false)).unwrap();
    assert_eq!(*torn.borrow(), vec!["then"]);
    cache.run_pass(|c| view(c, false)).unwrap();
    cache.run_pass(|c| view(c, true)).unwrap();
    assert_eq!(torn.borrow().len(), 1);
}

#[test]
fn test_second_branch_in_one_pass_is_rejected() {
    let mut cache = Cache::new();
    let err = cache
        .run_pass(|c| {
            c.open_block(BlockKind::Conditional)?;
            c.open_branch(0)?;
            c.close_branch()?;
            c.open_branch(1)?;
            Ok(())
        })
        .unwrap_err();
    assert_eq!(err, EngineError::MultipleBranches);
}

fn tab(c: &mut Cache, name: &str, seen: &Log<(String, MemoResult, i32)>) -> Result<()> {
    c.switch(name, |c| {
        let status = c.memo(42)?;
        let visits = c.remember_state(|| 0)?;
        *visits.borrow_mut() += 1;
        seen.borrow_mut()
            .push((name.to_string(), status, *visits.borrow()));
        Ok(())
    })
}

#[test]
fn test_switch_reentry_reports_first_render_conditional() {
    let mut cache = Cache::new();
    let seen = log();

    for name in ["a", "b", "a", "a"] {
        cache.run_pass(|c| tab(c, name, &seen)).unwrap();
    }

    let seen = seen.borrow();
    assert_eq!(seen[0], ("a".into(), MemoResult::FirstRender, 1));
    assert_eq!(seen[1], ("b".into(), MemoResult::FirstRender, 1));
    assert_eq!(seen[2], ("a".into(), MemoResult::FirstRenderConditional, 2));
    assert_eq!(seen[3], ("a".into(), MemoResult::Unchanged, 3));
}

#[test]
fn test_switch_detaches_and_destroy_policy_frees() {
    let mut cache = Cache::new();
    let seen = log();

    cache.run_pass(|c| tab(c, "a", &seen)).unwrap();
    cache.run_pass(|c| tab(c, "b", &seen)).unwrap();
    let keyed = child_at(&cache, cache.root(), 0);
    let children: Vec<(Key, ListId)> = cache
        .list(keyed)
        .unwrap()
        .keyed_children()
        .map(|(k, id)| (k.clone(), id))
        .collect();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].0, Key::from("a"));
    assert_eq!(cache.removal_level(children[0].1), RemovalLevel::Detached);
    assert_eq!(cache.removal_level(children[1].1), RemovalLevel::Present);

    cache
        .run_pass(|c| {
            c.switch_with_policy(SweepPolicy::Destroy, "c", |c| {
                c.memo(42)?;
                Ok(())
            })
        })
        .unwrap();
    assert_eq!(cache.removal_level(children[0].1), RemovalLevel::Destroyed);
    assert_eq!(cache.removal_level(children[1].1), RemovalLevel::Destroyed);
    assert_eq!(cache.list(keyed).unwrap().keyed_children().count(), 1);
}

#[test]
fn test_duplicate_key_is_fatal() {
    let mut cache = Cache::new();
    let err = cache
        .run_pass(|c| {
            c.open_block(BlockKind::Keyed)?;
            c.open_keyed("a")?;
            c.close_keyed()?;
            c.open_keyed("a")?;
            Ok(())
        })
        .unwrap_err();
    assert_eq!(err, EngineError::DuplicateKey { key: Key::from("a") });

    let err = cache
        .run_pass(|c| c.for_each_keyed([1, 2, 1], |i| *i, |_, _| Ok(())))
        .unwrap_err();
    assert_eq!(err, EngineError::DuplicateKey { key: Key::Int(1) });
}

fn rows(c: &mut Cache, n: usize, torn: &Log<usize>) -> Result<()> {
    c.for_each(0..n, |c, i| {
        if c.memo(())? == MemoResult::FirstRender {
            let torn = torn.clone();
            c.on_teardown(move || torn.borrow_mut().push(i))?;
        }
        c.remember(|| i)?;
        Ok(())
    })
}

#[test]
fn test_array_shrink_destroys_tail() {
    let mut cache = Cache::new();
    let torn = log();

    cache.run_pass(|c| rows(c, 5, &torn)).unwrap();
    let array = child_at(&cache, cache.root(), 0);
    let tail: Vec<ListId> = (2..5).map(|i| child_at(&cache, array, i)).collect();

    cache.run_pass(|c| rows(c, 2, &torn)).unwrap();
    assert_eq!(*torn.borrow(), vec![2, 3, 4]);
    assert_eq!(cache.list(array).unwrap().len(), 2);
    assert_eq!(cache.list(array).unwrap().last_cursor(), 2);
    for id in tail {
        assert_eq!(cache.removal_level(id), RemovalLevel::Destroyed);
    }

    cache.run_pass(|c| rows(c, 4, &torn)).unwrap();
    assert_eq!(cache.list(array).unwrap().len(), 4);
    cache.run_pass(|c| rows(c, 0, &torn)).unwrap();
    assert_eq!(*torn.borrow(), vec![2, 3, 4, 0, 1, 2, 3]);
}

#[test]
fn test_while_loop_iterates_array_block() {
    let mut cache = Cache::new();
    for limit in [3, 1, 4] {
        cache
            .run_pass(|c| {
                let mut i = 0;
                c.while_(
                    || {
                        i += 1;
                        i <= limit
                    },
                    |c| {
                        c.remember(|| ())?;
                        Ok(())
                    },
                )
            })
            .unwrap();
        let array = child_at(&cache, cache.root(), 0);
        assert_eq!(cache.list(array).unwrap().len(), limit);
    }
}

#[test]
fn test_keyed_list_keeps_state_across_reorder() {
    let mut cache = Cache::new();
    let torn = log();

    let view = |c: &mut Cache, ids: &[u32]| -> Result<()> {
        c.for_each_keyed(
            ids.iter().copied(),
            |id| *id,
            |c, id| {
                let st = c.remember_state(|| id * 10)?;
                assert_eq!(*st.borrow(), id * 10);
                if c.memo(())? == MemoResult::FirstRender {
                    let torn = torn.clone();
                    c.on_teardown(move || torn.borrow_mut().push(id))?;
                }
                Ok(())
            },
        )
    };

    cache.run_pass(|c| view(c, &[1, 2, 3])).unwrap();
    cache.run_pass(|c| view(c, &[3, 1])).unwrap();
    assert_eq!(*torn.borrow(), vec![2]);
    cache.run_pass(|c| view(c, &[1, 3, 4])).unwrap();
    assert_eq!(*torn.borrow(), vec![2]);
    let keyed = child_at(&cache, cache.root(), 0);
    assert_eq!(cache.list(keyed).unwrap().keyed_children().count(), 3);
}

#[test]
fn test_try_unwind_restores_depth() {
    let mut cache = Cache::new();

    cache.begin_pass().unwrap();
    let handle = cache.open_try().unwrap();
    let at_try = cache.depth();
    assert_eq!(handle.depth(), at_try);
    for _ in 0..3 {
        cache.open_block(BlockKind::Derived).unwrap();
        cache.remember(|| 0u8).unwrap();
    }
    assert_eq!(cache.depth(), at_try + 3);

    cache.catch_and_unwind(&handle, &"boom").unwrap();
    assert_eq!(cache.depth(), at_try);
    cache.close_try(handle).unwrap();
    cache.end_pass().unwrap();
    assert!(cache.needs_rerender());

    // a clean replay of the same shape, twice, passes every arity check
    for _ in 0..2 {
        cache
            .run_pass(|c| {
                let handle = c.open_try()?;
                for _ in 0..3 {
                    c.open_block(BlockKind::Derived)?;
                    c.remember(|| 0u8)?;
                }
                for _ in 0..3 {
                    c.close_block(BlockKind::Derived)?;
                }
                c.close_try(handle)
            })
            .unwrap();
        assert!(!cache.needs_rerender());
    }
}

#[test]
fn test_queries_suspended_until_close_try() {
    let mut cache = Cache::new();
    cache.begin_pass().unwrap();
    let handle = cache.open_try().unwrap();
    cache.catch_and_unwind(&handle, &"boom").unwrap();

    assert_eq!(
        cache.remember(|| 0).unwrap_err(),
        EngineError::QueriesSuspended
    );
    cache.close_try(handle).unwrap();
    assert_eq!(cache.end_pass().unwrap_err(), EngineError::QueriesSuspended);
    assert!(!cache.is_rendering());
}

#[test]
fn test_stale_try_handle_is_rejected() {
    let mut cache = Cache::new();

    cache.begin_pass().unwrap();
    let outer = cache.open_try().unwrap();
    let inner = cache.open_try().unwrap();
    cache.catch_and_unwind(&outer, &"outer failure").unwrap();
    let err = cache.catch_and_unwind(&inner, &"late").unwrap_err();
    assert_eq!(
        err,
        EngineError::UnwindTargetNotFound {
            depth: inner.depth()
        }
    );
    cache.abort_pass();

    // same depth and block, different pass
    cache.begin_pass().unwrap();
    let old = cache.open_try().unwrap();
    cache.abort_pass();
    cache.begin_pass().unwrap();
    let fresh = cache.open_try().unwrap();
    assert_eq!(old.list(), fresh.list());
    assert!(matches!(
        cache.catch_and_unwind(&old, &"stale"),
        Err(EngineError::UnwindTargetNotFound { .. })
    ));
    cache.abort_pass();
}

#[test]
fn test_try_catch_recovers_errors_and_panics() {
    let mut cache = Cache::new();

    cache
        .run_pass(|c| {
            let value = c.try_catch(
                |c| -> Result<u32, String> {
                    c.open_block(BlockKind::Derived).map_err(|e| e.to_string())?;
                    c.open_block(BlockKind::Derived).map_err(|e| e.to_string())?;
                    Err("bad input".to_string())
                },
                |caught| match caught {
                    Caught::Error(e) => {
                        assert_eq!(e, "bad input");
                        7
                    }
                    Caught::Panic(msg) => panic!("unexpected panic: {msg}"),
                },
            )?;
            assert_eq!(value, 7);

            let message = c.try_catch(
                |_| -> Result<String, String> { panic!("kaboom") },
                |caught| caught.to_string(),
            )?;
            assert_eq!(message, "panic: kaboom");
            Ok(())
        })
        .unwrap();
    assert!(cache.needs_rerender());
}

#[test]
fn test_try_does_not_swallow_engine_errors() {
    let mut cache = Cache::new();
    let view = |c: &mut Cache, text: bool| -> Result<()> {
        c.try_catch(
            |c| -> Result<(), EngineError> {
                if text {
                    c.remember(|| "text")?;
                } else {
                    c.remember(|| 1u8)?;
                }
                Ok(())
            },
            |_| (),
        )
    };

    cache.run_pass(|c| view(c, false)).unwrap();
    let err = cache.run_pass(|c| view(c, true)).unwrap_err();
    assert!(matches!(err, EngineError::PositionalMismatch { index: 0, .. }));
    assert!(!cache.is_rendering());
}

#[test]
fn test_unbalanced_blocks_fail_the_pass() {
    let mut cache = Cache::new();
    let err = cache
        .run_pass(|c| {
            c.open_block(BlockKind::Derived)?;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::UnbalancedStack { .. }));

    let mut cache = Cache::new();
    let err = cache
        .run_pass(|c| {
            c.open_block(BlockKind::Array)?;
            c.close_block(BlockKind::Derived)
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::UnbalancedStack { .. }));

    let err = cache.run_pass(|c| c.close_block(BlockKind::Derived)).unwrap_err();
    assert!(matches!(err, EngineError::UnbalancedStack { .. }));
}

#[test]
fn test_passes_do_not_nest() {
    let mut cache = Cache::new();
    cache.begin_pass().unwrap();
    assert_eq!(cache.begin_pass().unwrap_err(), EngineError::ReentrantPass);
    cache.end_pass().unwrap();
    assert_eq!(cache.end_pass().unwrap_err(), EngineError::NotRendering);
    assert_eq!(cache.remember(|| 0).unwrap_err(), EngineError::NotRendering);
}

#[test]
fn test_teardowns_run_children_first_and_survive_panics() {
    let mut cache = Cache::new();
    let torn = log();

    let view = |c: &mut Cache, show: bool, register: bool| -> Result<()> {
        c.if_(show, |c| {
            if register {
                let torn = torn.clone();
                c.on_teardown(move || torn.borrow_mut().push("outer"))?;
            }
            c.block(|c| {
                if register {
                    c.on_teardown(|| panic!("teardown failed"))?;
                    let torn = torn.clone();
                    c.on_teardown(move || torn.borrow_mut().push("inner"))?;
                }
                Ok(())
            })
        })?
        .end_if()
    };

    cache.run_pass(|c| view(c, true, true)).unwrap();
    assert_eq!(cache.list(cache.root()).unwrap().teardown_count(), 0);
    cache.run_pass(|c| view(c, false, false)).unwrap();
    assert_eq!(*torn.borrow(), vec!["inner", "outer"]);
}

#[test]
fn test_dropping_cache_runs_remaining_teardowns_once() {
    let count = Rc::new(Cell::new(0));
    {
        let mut cache = Cache::new();
        cache
            .run_pass(|c| {
                let count = count.clone();
                c.on_teardown(move || count.set(count.get() + 1))
            })
            .unwrap();
        assert_eq!(count.get(), 0);
    }
    assert_eq!(count.get(), 1);
}

#[test]
fn test_memo_classifies_values() {
    let mut cache = Cache::new();
    let mut results = Vec::new();
    for value in [1, 1, 2, 2] {
        cache
            .run_pass(|c| {
                results.push(c.memo(value)?);
                Ok(())
            })
            .unwrap();
    }
    assert_eq!(
        results,
        vec![
            MemoResult::FirstRender,
            MemoResult::Unchanged,
            MemoResult::Changed,
            MemoResult::Unchanged,
        ]
    );
    assert!(!MemoResult::Unchanged.should_run());
    assert!(MemoResult::FirstRenderConditional.is_first());
}

#[test]
fn test_nearest_ancestor_finds_context() {
    let mut cache = Cache::new();
    let surface = TypeTag::token("surface");
    let other = TypeTag::token("other");

    for expected in [2, 3] {
        cache
            .run_pass(|c| {
                c.with_context(surface, || vec!["root"], |c| {
                    c.block(|c| {
                        c.nearest_ancestor_mut::<Vec<&str>>(surface)
                            .unwrap()
                            .push("child");
                        assert_eq!(
                            c.nearest_ancestor::<Vec<&str>>(surface).unwrap().len(),
                            expected
                        );
                        assert!(c.nearest_ancestor::<Vec<&str>>(other).is_none());
                        assert!(c.nearest_ancestor::<String>(surface).is_none());
                        Ok(())
                    })
                })
            })
            .unwrap();
    }
    assert!(cache.nearest_ancestor::<Vec<&str>>(surface).is_none());
}

#[test]
fn test_disposable_effect_cleans_up_on_key_change_and_destroy() {
    let mut cache = Cache::new();
    let events = log();

    let view = |c: &mut Cache, show: bool, key: u32| -> Result<()> {
        c.if_(show, |c| {
            let events = events.clone();
            c.disposable_effect(key, move || {
                events.borrow_mut().push(format!("start {key}"));
                on_unmount(move || events.borrow_mut().push(format!("stop {key}")))
            })
        })?
        .end_if()
    };

    cache.run_pass(|c| view(c, true, 1)).unwrap();
    cache.run_pass(|c| view(c, true, 1)).unwrap();
    cache.run_pass(|c| view(c, true, 2)).unwrap();
    cache.run_pass(|c| view(c, false, 2)).unwrap();
    assert_eq!(
        *events.borrow(),
        vec!["start 1", "stop 1", "start 2", "stop 2"]
    );
}

#[test]
fn test_dispose_runs_at_most_once() {
    let count = Rc::new(Cell::new(0));
    let d = {
        let count = count.clone();
        Dispose::new(move || count.set(count.get() + 1))
    };
    let d2 = d.clone();
    d.run();
    d2.run();
    assert_eq!(count.get(), 1);
}

#[test]
fn test_scheduler_coalesces_rerender_requests() {
    let mut scheduler = Scheduler::new();
    let handle = scheduler.rerender_handle();
    let mut runs = 0;

    let stats = scheduler
        .tick(|c| {
            runs += 1;
            let n = c.remember_state(|| 0)?;
            *n.borrow_mut() += 1;
            if *n.borrow() < 3 {
                handle.request();
                handle.request();
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(
        stats,
        TickStats {
            passes: 3,
            settled: true
        }
    );
    assert_eq!(runs, 3);
    assert!(!handle.is_pending());
}

#[test]
fn test_scheduler_stops_at_pass_limit() {
    let mut scheduler = Scheduler::with_config(SchedulerConfig::default().max_passes_per_tick(4));
    let handle = scheduler.rerender_handle();
    let stats = scheduler
        .tick(|_| {
            handle.request();
            Ok(())
        })
        .unwrap();
    assert_eq!(
        stats,
        TickStats {
            passes: 4,
            settled: false
        }
    );
    assert_eq!(SchedulerConfig::default().max_passes_per_tick(0).max_passes_per_tick, 1);
}

#[test]
fn test_caught_error_triggers_another_pass() {
    let mut scheduler = Scheduler::new();
    let failed_once = Cell::new(false);

    let stats = scheduler
        .tick(|c| {
            c.try_catch(
                |c| -> Result<(), String> {
                    c.remember(|| 0u8).map_err(|e| e.to_string())?;
                    if !failed_once.replace(true) {
                        return Err("first load failed".into());
                    }
                    Ok(())
                },
                |_| (),
            )
        })
        .unwrap();
    assert_eq!(stats.passes, 2);
    assert!(stats.settled);
    assert_eq!(scheduler.ticks(), 1);
}
