//! TIM4ベースのHallセンサーインターフェース実装
//!
//! STM32のハードウェアHall Sensor Interface Mode（XORモード）を使用して、
//! 3つのHallセンサー入力から自動的にエッジ検出とタイムスタンプキャプチャを行います。
//! キャプチャ/オーバーフローは共有ドライブの `HallFeedback` へ転送されます。
//!
//! ## ハードウェア構成
//! - TIM4_CH1 (PB6): Hall H1
//! - TIM4_CH2 (PB7): Hall H2
//! - TIM4_CH3 (PB8): Hall H3
//! - クロック: 170MHz (APB1)
//!
//! ## 動作原理（参照: HAL_TIMEx_HallSensor_Init）
//! 1. 3つのHall入力がXORされてTI1に接続される（CR2.TI1S=1）
//! 2. TI1のエッジ検出がトリガーとして選択される（SMCR.TS=TI1F_ED）
//! 3. トリガーエッジでカウンターがリセットされる（SMCR.SMS=RESET）
//! 4. エッジごとにTIM4_CCR1へカウンタ値がキャプチャされ、CC1割り込みが発生
//! 5. UPDATE割り込みでオーバーフローを数え、タイムアウト（低速/停止）を検出

use embassy_stm32::pac;
use g4_sixstep::interface::{HallInputs, HallTimer};
use g4_sixstep::sixstep::HallLines;

use crate::config::hall::TIM4_IRQ_PRIORITY;
use g4_sixstep::{debug, trace};
use crate::state::{DriveContext, DRIVE};

/// Hall入力ピン番号（GPIOB）
const PIN_H1: usize = 6;
const PIN_H2: usize = 7;
const PIN_H3: usize = 8;

/// TIM4キャプチャタイマー（PAC直接アクセス）
pub struct Tim4Hall;

impl HallTimer for Tim4Hall {
    fn capture(&mut self) -> u16 {
        pac::TIM4.ccr(0).read().ccr() as u16
    }

    fn prescaler(&self) -> u16 {
        pac::TIM4.psc().read()
    }

    fn set_prescaler(&mut self, prescaler: u16) {
        // プリロードされ、次の更新イベントで反映される
        pac::TIM4.psc().write_value(prescaler);
    }

    fn reset_counter(&mut self) {
        let tim4 = pac::TIM4;
        tim4.cnt().write_value(pac::timer::regs::CntCore(0));
        tim4.egr().write(|w| w.set_ug(true)); // Update生成（プリスケーラ反映）
    }

    fn configure(&mut self, filter: u8, prescaler: u16) {
        let tim4 = pac::TIM4;
        tim4.cr1().modify(|w| w.set_cen(false));

        tim4.ccmr_input(0).modify(|w| {
            w.set_icf(0, pac::timer::vals::FilterValue::from_bits(filter & 0x0F));
        });
        tim4.psc().write_value(prescaler);

        tim4.sr().write(|w| w.0 = 0); // ステータスフラグクリア
        tim4.egr().write(|w| w.set_ug(true));
        tim4.cr1().modify(|w| w.set_cen(true));

        debug!("TIM4 configured: filter={}, prescaler={}", filter, prescaler);
    }

    fn set_phase_shift_compare(&mut self, compare: Option<u16>) {
        let tim4 = pac::TIM4;
        match compare {
            Some(value) => {
                tim4.ccr(1).modify(|w| w.set_ccr(value as _));
                tim4.dier().modify(|w| w.set_ccie(1, true));
            }
            None => tim4.dier().modify(|w| w.set_ccie(1, false)),
        }
    }
}

/// Hallセンサー入力（GPIOB IDR直接読み取り）
pub struct HallPins;

impl HallInputs for HallPins {
    fn read(&mut self) -> HallLines {
        let idr = pac::GPIOB.idr().read();
        HallLines {
            h1: idr.idr(PIN_H1) == pac::gpio::vals::Idr::HIGH,
            h2: idr.idr(PIN_H2) == pac::gpio::vals::Idr::HIGH,
            h3: idr.idr(PIN_H3) == pac::gpio::vals::Idr::HIGH,
        }
    }
}

/// Hall入力ピンをTIM4のAF2に設定
fn configure_hall_pin(pin: usize) {
    let gpiob = pac::GPIOB;

    gpiob
        .moder()
        .modify(|w| w.set_moder(pin, pac::gpio::vals::Moder::ALTERNATE));
    // AFR[0] = AFRL (0-7)、AFR[1] = AFRH (8-15)
    gpiob.afr(pin / 8).modify(|w| w.set_afr(pin % 8, 2));
    // 外部プルアップ前提のためプルアップ無し
    gpiob
        .pupdr()
        .modify(|w| w.set_pupdr(pin, pac::gpio::vals::Pupdr::FLOATING));
    gpiob
        .ospeedr()
        .modify(|w| w.set_ospeedr(pin, pac::gpio::vals::Ospeedr::VERY_HIGH_SPEED));
}

/// TIM4 Hall Sensor Interface の初期化
///
/// フィルタとプリスケーラは `HallFeedback::init`（[`HallTimer::configure`]）で
/// 設定されるため、ここではモード設定と割り込み有効化のみを行います。
///
/// # Safety
/// PACを使用した直接的なレジスタ操作を含むため、unsafe
pub unsafe fn init_hall_timer() {
    let rcc = pac::RCC;
    let tim4 = pac::TIM4;

    // 1. クロック有効化
    rcc.ahb2enr().modify(|w| w.set_gpioben(true)); // GPIOB
    rcc.apb1enr1().modify(|w| w.set_tim4en(true)); // TIM4

    // 2. GPIO設定（PB6/PB7/PB8をAlternate Function AF2に設定）
    configure_hall_pin(PIN_H1);
    configure_hall_pin(PIN_H2);
    configure_hall_pin(PIN_H3);

    // 3. TIM4設定
    tim4.cr1().modify(|w| w.set_cen(false));
    tim4.psc().write_value(0);
    tim4.arr().write_value(pac::timer::regs::ArrCore(0xFFFF)); // ARR = 65535

    // 4. Hall Sensor Interface Mode設定
    // CR2.TI1S = 1: CH1/CH2/CH3をXOR -> TI1
    tim4.cr2().modify(|w| {
        w.set_ti1s(pac::timer::vals::Ti1s::XOR);
    });

    // SMCR: TS = TI1F_ED、SMS = RESET（トリガーエッジでカウンターをリセット）
    tim4.smcr().modify(|w| {
        w.set_ts(pac::timer::vals::Ts::TI1F_ED);
        w.set_sms(pac::timer::vals::Sms::RESET_MODE);
    });

    // 5. Input Capture設定（CC1S = TRC）
    tim4.ccmr_input(0).modify(|w| {
        w.set_ccs(0, pac::timer::vals::CcmrInputCcs::TRC);
    });

    // 6. CCER: CC1E=1（キャプチャ有効）、立ち上がりエッジ
    // TI1F_EDトリガーにより両エッジが検出される
    tim4.ccer().modify(|w| {
        w.set_cce(0, true);
        w.set_ccp(0, false);
    });

    // 7. DIER: CC1IE（キャプチャ割り込み）、UIE（更新割り込み）
    tim4.dier().modify(|w| {
        w.set_ccie(0, true);
        w.set_uie(true);
    });

    // Update Request Source: カウンタオーバーフローのみ
    // （トリガーリセットとUGでは更新割り込みを発生させない）
    tim4.cr1()
        .modify(|w| w.set_urs(pac::timer::vals::Urs::COUNTER_ONLY));

    // 8. 割り込み有効化（NVIC）
    unsafe {
        cortex_m::peripheral::NVIC::unmask(pac::Interrupt::TIM4);
        let mut cp = cortex_m::Peripherals::steal();
        cp.NVIC.set_priority(pac::Interrupt::TIM4, TIM4_IRQ_PRIORITY);
    }
}

/// TIM4割り込みハンドラー（Capture/Compare 1 + Update）
///
/// # Safety
/// 割り込みコンテキストで実行されるため、処理は最小限にする
#[inline(always)]
pub unsafe fn tim4_irq_handler() {
    let tim4 = pac::TIM4;
    let sr = tim4.sr().read();

    // フラグを先にクリア
    tim4.sr().modify(|w| {
        if sr.uif() {
            w.set_uif(false);
        }
        if sr.ccif(0) {
            w.set_ccif(0, false);
        }
        if sr.ccif(1) {
            w.set_ccif(1, false);
        }
    });

    DRIVE.lock(|cell| {
        let mut guard = cell.borrow_mut();
        let Some(ctx) = guard.as_mut() else {
            return;
        };
        let DriveContext {
            drive,
            stage,
            hall_timer,
            hall_pins,
        } = ctx;

        // UPDATE割り込み（オーバーフロー）
        if sr.uif() {
            drive.hall_overflow(hall_timer);
        }

        // CAPTURE/COMPARE 1割り込み（Hallエッジ検出）
        if sr.ccif(0) {
            drive.hall_capture(hall_timer, hall_pins, stage);
        }

        // CC2（位相シフト）: このボードは位相シフト0で運用
        if sr.ccif(1) {
            trace!("TIM4 phase shift compare");
        }
    });
}

/// TIM4割り込みのRust側エントリーポイント
/// memory.xまたはリンカースクリプトでTIM4割り込みベクタに登録する
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn TIM4() {
    tim4_irq_handler();
}
