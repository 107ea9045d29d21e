//! AudioNode trait and core types

use super::buffer::AudioBuffer;
use std::any::Any;

/// Node の一意識別子
///
/// 重要: NodeHandle は不透明なIDであり、ノードの種類を示さない。
/// ノードの種類はノード自体が持つ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u32);

impl NodeHandle {
    /// 新しいハンドルを生成（内部でのみ使用）
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// ポート（チャンネル）の識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(u8);

impl PortId {
    pub fn new(index: u8) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// ノードの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// メディア要素などの音源
    Source,
    /// ゲイン・フィルタ・ピッチ・アナライザ
    Processor,
    /// 最終出力
    Destination,
}

/// ノードの入出力バッファ
///
/// Source は入力なし、Destination は出力なし。
pub struct Ports {
    pub inputs: Vec<AudioBuffer>,
    pub outputs: Vec<AudioBuffer>,
}

impl Ports {
    pub fn new(inputs: usize, outputs: usize) -> Self {
        Self {
            inputs: (0..inputs).map(|_| AudioBuffer::new()).collect(),
            outputs: (0..outputs).map(|_| AudioBuffer::new()).collect(),
        }
    }

    /// Same channel count in and out
    pub fn symmetric(channels: usize) -> Self {
        Self::new(channels, channels)
    }

    /// 入力 → 出力にコピー（パススルー処理の共通部分）
    pub fn copy_through(&mut self, frames: usize) {
        for (i, out) in self.outputs.iter_mut().enumerate() {
            out.set_valid_frames(frames);
            if let Some(input) = self.inputs.get(i) {
                out.copy_from(input);
            }
        }
    }
}

/// オーディオノードの統一インターフェース
///
/// すべてのノード種類がこのトレイトを実装する。
/// グラフは具体的なノード種類を知らずに処理できる。
pub trait AudioNode: Send + Sync {
    /// ノードの種類を返す
    fn node_type(&self) -> NodeType;

    /// ノードのラベル（表示名）を返す
    fn label(&self) -> &str;

    fn ports(&self) -> &Ports;

    fn ports_mut(&mut self) -> &mut Ports;

    /// ノードの処理を実行
    ///
    /// 入力バッファはエッジからミックス済みの状態で呼ばれる。
    fn process(&mut self, frames: usize);

    /// 入力ポート数を返す
    fn input_port_count(&self) -> usize {
        self.ports().inputs.len()
    }

    /// 出力ポート数を返す
    fn output_port_count(&self) -> usize {
        self.ports().outputs.len()
    }

    fn input_buffer(&self, port: PortId) -> Option<&AudioBuffer> {
        self.ports().inputs.get(port.index())
    }

    fn input_buffer_mut(&mut self, port: PortId) -> Option<&mut AudioBuffer> {
        self.ports_mut().inputs.get_mut(port.index())
    }

    fn output_buffer(&self, port: PortId) -> Option<&AudioBuffer> {
        self.ports().outputs.get(port.index())
    }

    fn output_buffer_mut(&mut self, port: PortId) -> Option<&mut AudioBuffer> {
        self.ports_mut().outputs.get_mut(port.index())
    }

    /// バッファをクリア
    fn clear_buffers(&mut self, frames: usize) {
        let ports = self.ports_mut();
        for buf in ports.inputs.iter_mut().chain(ports.outputs.iter_mut()) {
            buf.clear(frames);
        }
    }

    /// 入力ピークレベルを取得（メータリング用）
    fn input_peak_levels(&self) -> Vec<f32> {
        self.ports().inputs.iter().map(|b| b.cached_peak()).collect()
    }

    /// 出力ピークレベルを取得（メータリング用）
    fn output_peak_levels(&self) -> Vec<f32> {
        self.ports().outputs.iter().map(|b| b.cached_peak()).collect()
    }

    /// Anyトレイトへのダウンキャスト用
    fn as_any(&self) -> &dyn Any;

    /// Anyトレイトへのダウンキャスト用（可変）
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
