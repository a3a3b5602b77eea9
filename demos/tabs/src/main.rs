use std::cell::Cell;

use anyhow::anyhow;
use reprise_core::*;
use reprise_devtools::Inspector;
use web_time::Instant;

#[derive(Clone)]
struct Mail {
    id: u32,
    subject: &'static str,
}

struct App {
    tab: &'static str,
    inbox: Vec<Mail>,
    banner: bool,
    /// The drafts loader fails on its first attempt.
    drafts_loaded: Cell<bool>,
}

fn inbox(c: &mut Cache, mails: &[Mail]) -> Result<()> {
    let opened = c.remember_state(|| 0u32)?;
    *opened.borrow_mut() += 1;
    if c.memo(mails.len())?.should_run() {
        log::info!("inbox: {} message(s), opened {} time(s)", mails.len(), opened.borrow());
    }

    c.for_each_keyed(
        mails.iter().cloned(),
        |m| m.id,
        |c, mail| {
            let id = mail.id;
            c.disposable_effect(mail.subject, move || {
                log::info!("row {id} mounted");
                on_unmount(move || log::info!("row {id} unmounted"))
            })
        },
    )
}

fn drafts(c: &mut Cache, loaded: &Cell<bool>) -> Result<()> {
    let text = c.try_catch(
        |c| -> Result<String, String> {
            c.block(|c| c.remember(|| "draft body".to_string()))
                .map_err(|e| e.to_string())?;
            if !loaded.replace(true) {
                return Err("drafts service unavailable".into());
            }
            Ok("1 draft".into())
        },
        |caught| format!("retrying after: {caught}"),
    )?;
    log::info!("drafts: {text}");
    Ok(())
}

fn app(c: &mut Cache, state: &App) -> Result<()> {
    c.if_(state.banner, |c| {
        let seen = c.remember_state(|| 0)?;
        *seen.borrow_mut() += 1;
        log::info!("banner shown ({} pass(es))", seen.borrow());
        if c.memo(())? == MemoResult::FirstRender {
            c.on_teardown(|| log::info!("banner torn down"))?;
        }
        Ok(())
    })?
    .end_if()?;

    c.switch(state.tab, |c| match state.tab {
        "inbox" => inbox(c, &state.inbox),
        "drafts" => drafts(c, &state.drafts_loaded),
        _ => {
            c.for_each(0..3, |c, i| {
                c.remember(move || i)?;
                Ok(())
            })
        }
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut scheduler = Scheduler::with_config(SchedulerConfig::from_env());
    let mut inspector = Inspector::new();
    inspector.hud.toggle_inspector();

    let mail = |id, subject| Mail { id, subject };
    let mut state = App {
        tab: "inbox",
        inbox: vec![mail(1, "welcome"), mail(2, "invoice"), mail(3, "meeting")],
        banner: false,
        drafts_loaded: Cell::new(false),
    };

    let script: [fn(&mut App); 5] = [
        |_| {},
        |s| s.banner = true,
        |s| {
            s.tab = "drafts";
            s.banner = false;
        },
        |s| {
            s.tab = "inbox";
            s.inbox.remove(1);
        },
        |s| s.tab = "archive",
    ];

    for step in script {
        step(&mut state);
        let started = Instant::now();
        let stats = scheduler
            .tick(|c| app(c, &state))
            .map_err(|e| anyhow!("tick failed: {e}"))?;
        inspector.record_pass(scheduler.cache(), started);
        log::info!("tab `{}`: {} pass(es), settled: {}", state.tab, stats.passes, stats.settled);
        if let Some(line) = inspector.frame() {
            println!("{line}");
        }
    }

    println!("{}", inspector.snapshot(scheduler.cache()).to_json()?);
    scheduler.dispose();
    Ok(())
}
