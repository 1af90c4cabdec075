//! Canned responses and the built-in template catalog.
//!
//! Each function returns a closure for [`Trigger::output`](super::Trigger::output).
//! The templates they reference ship in [`builtin_catalog`], which every
//! loaded set falls back to.

use std::sync::OnceLock;

use crate::error::TriggerError;
use crate::event::Field;
use crate::output::{Message, Response, Severity, Template, TemplateCatalog};

use super::definition::TriggerContext;

/// Templates available to every trigger set.
pub fn builtin_catalog() -> &'static TemplateCatalog {
    static CATALOG: OnceLock<TemplateCatalog> = OnceLock::new();
    CATALOG.get_or_init(|| {
        TemplateCatalog::new()
            .with(
                "aoe",
                Template::new().en("aoe").de("AoE").fr("AoE").ja("AoE").cn("AOE").ko("전체 공격"),
            )
            .with(
                "bigAoe",
                Template::new()
                    .en("big aoe!")
                    .de("Großer AoE!")
                    .fr("Grosse AoE !")
                    .ja("強AoE")
                    .cn("大AOE伤害！")
                    .ko("강한 전체 공격!"),
            )
            .with(
                "tankBusterOnYou",
                Template::new()
                    .en("Tank Buster on YOU")
                    .de("Tankbuster auf DIR")
                    .fr("Tankbuster sur VOUS")
                    .ja("自分にタンクバスター")
                    .cn("坦克死刑点名")
                    .ko("탱버 대상자"),
            )
            .with(
                "tankBusterOnPlayer",
                Template::new()
                    .en("Tank Buster on ${player}")
                    .de("Tankbuster auf ${player}")
                    .fr("Tankbuster sur ${player}")
                    .ja("${player}にタンクバスター")
                    .cn("死刑 点 ${player}")
                    .ko("\"${player}\" 탱버")
                    .params(["player"]),
            )
            .with(
                "tankBusters",
                Template::new()
                    .en("Tank Busters")
                    .de("Tankbuster")
                    .fr("Tankbusters")
                    .ja("タンクバスター")
                    .cn("坦克死刑")
                    .ko("탱버"),
            )
            .with(
                "spread",
                Template::new().en("Spread").de("Verteilen").fr("Dispersez-vous").ja("散開").cn("分散").ko("산개"),
            )
            .with(
                "stackOnYou",
                Template::new()
                    .en("Stack on YOU")
                    .de("Auf DIR sammeln")
                    .fr("Package sur VOUS")
                    .ja("自分に集合")
                    .cn("集合点名")
                    .ko("쉐어징 대상자"),
            )
            .with(
                "stackOnPlayer",
                Template::new()
                    .en("Stack on ${player}")
                    .de("Auf ${player} sammeln")
                    .fr("Packez-vous sur ${player}")
                    .ja("${player}に集合")
                    .cn("靠近 ${player}集合")
                    .ko("\"${player}\" 쉐어징")
                    .params(["player"]),
            )
            .with(
                "knockback",
                Template::new().en("Knockback").de("Rückstoß").fr("Poussée").ja("ノックバック").cn("击退").ko("넉백"),
            )
            .with(
                "getOut",
                Template::new().en("Get Out").de("Raus da").fr("Éloignez-vous").ja("ボスから離れる").cn("远离").ko("밖으로"),
            )
            .with(
                "getUnder",
                Template::new().en("Get Under").de("Unter ihn").fr("En dessous").ja("ボスと貼り付く").cn("去脚下").ko("보스 아래로"),
            )
            .with(
                "lookAway",
                Template::new().en("Look Away").de("Wegschauen").fr("Regardez ailleurs").ja("ボスを見ない").cn("背对BOSS").ko("뒤돌기"),
            )
            .with(
                "awayFromFront",
                Template::new()
                    .en("Away From Front")
                    .de("Weg von Vorne")
                    .fr("Éloignez-vous du devant")
                    .ja("前方から離れる")
                    .cn("远离正面")
                    .ko("보스 정면 피하기"),
            )
    })
}

/// A fixed single-message response.
pub fn simple(
    severity: Severity,
    key: &'static str,
) -> impl Fn(&TriggerContext<'_>) -> Result<Option<Response>, TriggerError> + Send + Sync + Clone + 'static {
    move |_: &TriggerContext<'_>| Ok(Some(Message::template(severity, key).into()))
}

pub fn aoe() -> impl Fn(&TriggerContext<'_>) -> Result<Option<Response>, TriggerError> + Send + Sync + Clone + 'static {
    simple(Severity::Info, "aoe")
}

pub fn big_aoe() -> impl Fn(&TriggerContext<'_>) -> Result<Option<Response>, TriggerError> + Send + Sync + Clone + 'static {
    simple(Severity::Warning, "bigAoe")
}

pub fn spread() -> impl Fn(&TriggerContext<'_>) -> Result<Option<Response>, TriggerError> + Send + Sync + Clone + 'static {
    simple(Severity::Warning, "spread")
}

pub fn knockback() -> impl Fn(&TriggerContext<'_>) -> Result<Option<Response>, TriggerError> + Send + Sync + Clone + 'static {
    simple(Severity::Info, "knockback")
}

pub fn get_out() -> impl Fn(&TriggerContext<'_>) -> Result<Option<Response>, TriggerError> + Send + Sync + Clone + 'static {
    simple(Severity::Alarm, "getOut")
}

pub fn get_under() -> impl Fn(&TriggerContext<'_>) -> Result<Option<Response>, TriggerError> + Send + Sync + Clone + 'static {
    simple(Severity::Warning, "getUnder")
}

pub fn look_away() -> impl Fn(&TriggerContext<'_>) -> Result<Option<Response>, TriggerError> + Send + Sync + Clone + 'static {
    simple(Severity::Warning, "lookAway")
}

pub fn away_from_front() -> impl Fn(&TriggerContext<'_>) -> Result<Option<Response>, TriggerError> + Send + Sync + Clone + 'static {
    simple(Severity::Warning, "awayFromFront")
}

/// Alarm for the targeted player, info naming the target for everyone else.
pub fn tank_buster() -> impl Fn(&TriggerContext<'_>) -> Result<Option<Response>, TriggerError> + Send + Sync + Clone + 'static {
    |ctx: &TriggerContext<'_>| {
        let target = ctx.field(Field::Target);
        let response = if ctx.player().is(target, ctx.field(Field::TargetId)) {
            Response::alarm("tankBusterOnYou")
        } else if let Some(name) = target {
            Response::info("tankBusterOnPlayer").param("player", name)
        } else {
            Response::info("tankBusters")
        };
        Ok(Some(response))
    }
}

/// Stack on the marked player. Fails when the event names no target.
pub fn stack_marker() -> impl Fn(&TriggerContext<'_>) -> Result<Option<Response>, TriggerError> + Send + Sync + Clone + 'static {
    |ctx: &TriggerContext<'_>| {
        let target = ctx.captures().require(Field::Target)?;
        let response = if ctx.player().is(Some(target), ctx.field(Field::TargetId)) {
            Response::warning("stackOnYou")
        } else {
            Response::warning("stackOnPlayer").param("player", target)
        };
        Ok(Some(response))
    }
}
